use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::{debug, info};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::errors::{DriverError, Result};

/// Timeout for a single low-level read; the overall deadline is enforced on top.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Byte link to the logger: a serial port or anything that behaves like one.
pub trait Link: Read + Write + Send {
    /// Drop bytes received but not yet read.
    fn discard_input(&mut self) -> io::Result<()>;
}

impl Link for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Open connection to the logger.
pub struct Connection {
    link: Option<Box<dyn Link>>,
    port: String,
    baud_rate: u32,
    timeout: Duration,
}

impl Connection {
    /// Open and configure a serial port (8N1, DTR asserted, RTS cleared).
    pub fn open(port: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let mut serial = serialport::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(POLL_TIMEOUT.min(timeout))
            .open()?;
        serial.write_data_terminal_ready(true)?;
        serial.write_request_to_send(false)?;
        info!("Opened port {} at {} baud", port, baud_rate);
        Ok(Self::from_link(Box::new(serial), port, baud_rate, timeout))
    }

    /// Wrap an already open link.
    pub fn from_link(link: Box<dyn Link>, port: &str, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            link: Some(link),
            port: port.to_string(),
            baud_rate,
            timeout,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    fn link(&mut self) -> Result<&mut Box<dyn Link>> {
        self.link.as_mut().ok_or(DriverError::NotConnected)
    }

    /// Read exactly `n` bytes or fail once `timeout` has elapsed.
    ///
    /// On timeout the bytes received so far are reported inside the error;
    /// they are never returned as a partial success.
    pub fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        let link = self.link()?;
        let mut buf = vec![0u8; n];
        let mut filled = 0usize;
        let deadline = Instant::now() + timeout;

        while filled < n {
            match link.read(&mut buf[filled..]) {
                // End of file: wait for more data instead of spinning.
                Ok(0) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    std::thread::sleep(POLL_TIMEOUT.min(remaining));
                }
                Ok(count) => filled += count,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }

            if filled < n && Instant::now() >= deadline {
                buf.truncate(filled);
                debug!("Read timed out after {} of {} bytes", filled, n);
                return Err(DriverError::Timeout {
                    expected: n,
                    received: buf,
                });
            }
        }
        Ok(buf)
    }

    /// Read with the connection's configured timeout.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        self.read_exact(n, timeout)
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let link = self.link()?;
        link.write_all(bytes)?;
        link.flush()?;
        Ok(())
    }

    pub fn discard_input(&mut self) -> Result<()> {
        self.link()?.discard_input()?;
        Ok(())
    }

    /// Release the link. Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.link.take().is_some() {
            info!("Closed port {}", self.port);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Link that hands out scripted chunks, one per read call.
    struct ChunkedLink {
        chunks: VecDeque<io::Result<Vec<u8>>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for ChunkedLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(Ok(chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(Ok(chunk[n..].to_vec()));
                    }
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::TimedOut.into()),
            }
        }
    }

    impl Write for ChunkedLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Link for ChunkedLink {
        fn discard_input(&mut self) -> io::Result<()> {
            self.chunks.clear();
            Ok(())
        }
    }

    fn connection(chunks: Vec<io::Result<Vec<u8>>>) -> (Connection, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let link = ChunkedLink {
            chunks: chunks.into(),
            written: Arc::clone(&written),
        };
        let conn = Connection::from_link(Box::new(link), "test", 115_200, Duration::from_millis(30));
        (conn, written)
    }

    #[test]
    fn assembles_fragmented_reads() {
        let (mut conn, _) = connection(vec![
            Ok(vec![1, 2]),
            Err(io::ErrorKind::TimedOut.into()),
            Ok(vec![3]),
            Err(io::ErrorKind::Interrupted.into()),
            Ok(vec![4, 5, 6]),
        ]);
        assert_eq!(conn.read(4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(conn.read(2).unwrap(), vec![5, 6]);
    }

    #[test]
    fn timeout_carries_partial_bytes() {
        let (mut conn, _) = connection(vec![Ok(vec![0xAA, 0xBB])]);
        let err = conn.read_exact(5, Duration::from_millis(20)).unwrap_err();
        match err {
            DriverError::Timeout { expected, received } => {
                assert_eq!(expected, 5);
                assert_eq!(received, vec![0xAA, 0xBB]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Link that reports end of file on every read.
    struct EofLink {
        reads: Arc<Mutex<usize>>,
    }

    impl Read for EofLink {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            *self.reads.lock().unwrap() += 1;
            Ok(0)
        }
    }

    impl Write for EofLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Link for EofLink {
        fn discard_input(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn eof_link_times_out_without_spinning() {
        let reads = Arc::new(Mutex::new(0));
        let link = EofLink {
            reads: Arc::clone(&reads),
        };
        let timeout = Duration::from_millis(120);
        let mut conn = Connection::from_link(Box::new(link), "eof", 115_200, timeout);
        assert!(matches!(
            conn.read(3),
            Err(DriverError::Timeout { expected: 3, .. })
        ));
        assert!(*reads.lock().unwrap() <= 5);
    }

    #[test]
    fn hardware_errors_are_io() {
        let (mut conn, _) = connection(vec![Err(io::ErrorKind::BrokenPipe.into())]);
        assert!(matches!(conn.read(1), Err(DriverError::Io(_))));
    }

    #[test]
    fn writes_reach_the_link() {
        let (mut conn, written) = connection(Vec::new());
        conn.write(&[0x81]).unwrap();
        conn.write(&[0xAA]).unwrap();
        assert_eq!(*written.lock().unwrap(), vec![0x81, 0xAA]);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut conn, _) = connection(vec![Ok(vec![1])]);
        conn.close();
        conn.close();
        assert!(!conn.is_open());
        assert!(matches!(conn.read(1), Err(DriverError::NotConnected)));
        assert!(matches!(conn.write(&[1]), Err(DriverError::NotConnected)));
    }
}
