//! D-LOGG session: connection lifecycle, identity cache and transfer state.
//!
//! # Transfer state
//!
//! The logger keeps a read cursor open from the first fetch command until it
//! receives an end-read command. While that transfer is open the session
//! refuses every command except further fetches and [`DLogg::fetch_end`], so a
//! forgotten end-read shows up as [`DriverError::TransferInProgress`] instead
//! of a confused device.
//!
//! # Error recovery
//!
//! The protocol has no resynchronisation command. After any I/O, timeout or
//! framing error the connection is closed and every further call fails with
//! [`DriverError::NotConnected`] until [`DLogg::reopen`] is called. Nothing is
//! retried automatically.

use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::address::Address;
use crate::codec::{decode_reply, CommandFrame, Reply, ResponseFrame};
use crate::definitions::{DeviceType, FirmwareVersion, LoggingCriterion, Mode};
use crate::errors::{DecodeError, DriverError, Result, Shortfall};
use crate::fetch::{self, Block};
use crate::records::{CurrentData, HeaderInfo, Sample};
use crate::transport::Connection;

// ============================================================================
// Constants
// ============================================================================

/// Baud rate mandated by the D-LOGG.
pub const BAUD_RATE: u32 = 115_200;

/// Default timeout for a complete reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// The logger ignores commands sent right after a get-type reply.
const TYPE_SETTLE_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// Configuration
// ============================================================================

/// Parameters used to open (and reopen) a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
    pub type_settle_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
            type_settle_delay: TYPE_SETTLE_DELAY,
        }
    }
}

impl SessionConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_type_settle_delay(mut self, delay: Duration) -> Self {
        self.type_settle_delay = delay;
        self
    }
}

/// Produces a fresh connection for `open` and `reopen`.
pub type Opener = Box<dyn FnMut(&SessionConfig) -> Result<Connection> + Send>;

/// Identity values, each cached after its first successful query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub device_type: Option<DeviceType>,
    pub firmware: Option<FirmwareVersion>,
    pub mode: Option<Mode>,
}

impl DeviceIdentity {
    pub fn is_known(&self) -> bool {
        self.device_type.is_some() && self.firmware.is_some() && self.mode.is_some()
    }
}

// ============================================================================
// Session
// ============================================================================

/// Session with one D-LOGG logger.
///
/// # Example
/// ```no_run
/// use dlogg::{DLogg, SessionConfig};
///
/// let mut logger = DLogg::open(SessionConfig::new("/dev/ttyUSB0"))?;
/// let header = logger.get_header()?;
/// let samples = logger.fetch_data_range(header.start_position(), 10);
/// logger.fetch_end()?;
/// for sample in samples? {
///     println!("{sample}");
/// }
/// # Ok::<(), dlogg::DriverError>(())
/// ```
pub struct DLogg {
    config: SessionConfig,
    opener: Opener,
    conn: Option<Connection>,
    identity: DeviceIdentity,
    header: Option<HeaderInfo>,
    transfer_open: bool,
    /// The link was lost while the device still had a transfer open.
    transfer_interrupted: bool,
}

impl DLogg {
    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Open the serial port named in `config` and verify the logger mode.
    pub fn open(config: SessionConfig) -> Result<Self> {
        Self::with_opener(
            config,
            Box::new(|cfg: &SessionConfig| Connection::open(&cfg.port, cfg.baud_rate, cfg.timeout)),
        )
    }

    /// Open a session over connections produced by `opener`.
    ///
    /// Only loggers in 1DL mode are supported; other modes fail with
    /// [`DriverError::Unsupported`] and leave nothing open.
    pub fn with_opener(config: SessionConfig, opener: Opener) -> Result<Self> {
        let mut session = Self {
            config,
            opener,
            conn: None,
            identity: DeviceIdentity::default(),
            header: None,
            transfer_open: false,
            transfer_interrupted: false,
        };
        session.connect()?;
        Ok(session)
    }

    fn connect(&mut self) -> Result<()> {
        self.conn = Some((self.opener)(&self.config)?);
        let mode = match self.query_mode() {
            Ok(mode) => mode,
            Err(e) => {
                self.drop_connection();
                return Err(e);
            }
        };
        info!("Mode of connected logger: {:?}", mode);
        if mode != Mode::OneDl {
            self.drop_connection();
            return Err(DriverError::Unsupported(format!("logger mode {mode:?}")));
        }
        Ok(())
    }

    /// Close the current connection (if any) and open a new one.
    ///
    /// A transfer that was open when the previous connection was lost is
    /// released on the device before returning.
    pub fn reopen(&mut self) -> Result<()> {
        self.close();
        self.connect()?;
        if self.transfer_interrupted {
            info!("Releasing transfer left open by the previous connection");
            self.transceive(&CommandFrame::end_read())?;
            self.transfer_interrupted = false;
        }
        Ok(())
    }

    /// Close the connection. Safe to call repeatedly.
    ///
    /// An open transfer is released with a best-effort end-read first.
    pub fn close(&mut self) {
        if self.transfer_open && self.conn.is_some() {
            warn!("Closing with an open transfer; sending end-read");
            if let Err(e) = self.fetch_end() {
                warn!("End-read on close failed: {}", e);
            }
        }
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
        self.transfer_open = false;
        self.header = None;
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    /// Header from the last [`DLogg::get_header`] on the current connection.
    pub fn cached_header(&self) -> Option<&HeaderInfo> {
        self.header.as_ref()
    }

    /// Whether the device has a transfer open that needs [`DLogg::fetch_end`].
    pub fn transfer_open(&self) -> bool {
        self.transfer_open
    }

    // ------------------------------------------------------------------------
    // Device Commands
    // ------------------------------------------------------------------------

    pub fn get_type(&mut self) -> Result<DeviceType> {
        self.ensure_open()?;
        if let Some(device_type) = self.identity.device_type {
            return Ok(device_type);
        }
        let frame = self.transceive(&CommandFrame::get_type())?;
        // Commands sent right after this reply are dropped by the device.
        std::thread::sleep(self.config.type_settle_delay);
        let device_type = DeviceType::from_code(first_byte(&frame)?, 0)?;
        debug!("Device type: {:?}", device_type);
        self.identity.device_type = Some(device_type);
        Ok(device_type)
    }

    pub fn get_firmware_version(&mut self) -> Result<FirmwareVersion> {
        self.ensure_open()?;
        if let Some(firmware) = self.identity.firmware {
            return Ok(firmware);
        }
        let frame = self.transceive(&CommandFrame::get_firmware_version())?;
        let firmware = FirmwareVersion::from_raw(first_byte(&frame)?);
        debug!("Firmware version: {}", firmware);
        self.identity.firmware = Some(firmware);
        Ok(firmware)
    }

    pub fn get_mode(&mut self) -> Result<Mode> {
        self.ensure_open()?;
        match self.identity.mode {
            Some(mode) => Ok(mode),
            None => self.query_mode(),
        }
    }

    fn query_mode(&mut self) -> Result<Mode> {
        let frame = self.transceive(&CommandFrame::get_mode())?;
        let mode = Mode::from_code(first_byte(&frame)?, 0)?;
        self.identity.mode = Some(mode);
        Ok(mode)
    }

    /// Requires firmware 2.9 or newer; checked when the firmware version is known.
    pub fn get_logging_criterion(&mut self) -> Result<LoggingCriterion> {
        self.ensure_open()?;
        if let Some(firmware) = self.identity.firmware {
            if !firmware.supports_logging_criterion() {
                return Err(DriverError::Unsupported(format!(
                    "logging criterion query needs firmware {} or newer, device has {}",
                    FirmwareVersion::LOGGING_CRITERION_MIN,
                    firmware
                )));
            }
        }
        let frame = self.transceive(&CommandFrame::get_logging_criterion())?;
        Ok(LoggingCriterion::from_raw(first_byte(&frame)?, 0)?)
    }

    pub fn set_logging_criterion(&mut self, criterion: LoggingCriterion) -> Result<()> {
        self.transceive(&CommandFrame::set_logging_criterion(criterion.to_raw()))?;
        info!("Logging criterion set to {}", criterion);
        Ok(())
    }

    /// Query the header and refresh the cached copy used for range checks.
    pub fn get_header(&mut self) -> Result<HeaderInfo> {
        let frame = self.transceive(&CommandFrame::get_header())?;
        let header = HeaderInfo::decode(&frame.payload)?;
        debug!("Header: {}", header);
        self.header = Some(header.clone());
        Ok(header)
    }

    pub fn get_current_data(&mut self) -> Result<CurrentData> {
        let frame = self.transceive(&CommandFrame::get_current_data())?;
        Ok(CurrentData::decode(&frame.payload)?)
    }

    /// Fetch `count` samples starting at logical position `start`.
    ///
    /// The range must lie within the header's range; the cached header is
    /// used when available, otherwise it is queried first. The transfer stays
    /// open afterwards and must be closed with [`DLogg::fetch_end`].
    pub fn fetch_data_range(&mut self, start: u32, count: usize) -> Result<Vec<Sample>> {
        self.ensure_open()?;
        let header = match &self.header {
            Some(header) => header.clone(),
            None => self.get_header()?,
        };
        let samples = fetch::fetch_range(&header, start, count, |position, _| {
            self.fetch_block(position)
        })?;
        debug!("Fetched {} samples from position {}", samples.len(), start);
        Ok(samples)
    }

    /// Fetch the sample stored at one logical position, without range checks.
    pub fn fetch_sample(&mut self, position: u32) -> Result<Sample> {
        match self.fetch_block(position)? {
            Block::Samples(mut samples) if samples.len() == 1 => Ok(samples.remove(0)),
            Block::Samples(samples) if samples.is_empty() => Err(DriverError::IncompleteRange {
                start: position,
                requested: 1,
                received: 0,
                shortfall: Shortfall::ShortBlock,
            }),
            Block::Samples(samples) => Err(DriverError::ProtocolMismatch {
                opcode: crate::codec::CMD_FETCH_BLOCK,
                expected: vec![1],
                actual: vec![samples.len() as u8],
            }),
            Block::EndOfData => Err(DriverError::IncompleteRange {
                start: position,
                requested: 1,
                received: 0,
                shortfall: Shortfall::EndOfData,
            }),
        }
    }

    fn fetch_block(&mut self, position: u32) -> Result<Block> {
        self.ensure_open()?;
        let address = Address::from_position(position);
        if !self.transfer_open {
            debug!("Opening transfer at address {}", address);
        }
        self.transfer_open = true;
        match self.exchange(&CommandFrame::fetch_block(address))? {
            Reply::EndOfData => Ok(Block::EndOfData),
            Reply::Frame(frame) => {
                let sample = Sample::decode(position, &frame.payload)?;
                debug!("Fetched data from address {}", address);
                Ok(Block::Samples(vec![sample]))
            }
        }
    }

    /// Close the device-side transfer opened by a fetch.
    pub fn fetch_end(&mut self) -> Result<()> {
        self.transceive(&CommandFrame::end_read())?;
        self.transfer_open = false;
        debug!("Fetch end");
        Ok(())
    }

    /// Fetch every stored sample and close the transfer.
    ///
    /// The end-read is sent whenever the connection survived the fetch, also
    /// when the fetch itself failed.
    pub fn fetch_all_data(&mut self) -> Result<Vec<Sample>> {
        let header = self.get_header()?;
        let result = self.fetch_data_range(header.start_position(), header.sample_count as usize);
        let end = if self.is_open() { self.fetch_end() } else { Ok(()) };
        let samples = result?;
        end?;
        Ok(samples)
    }

    /// Erase all samples stored in the logger.
    pub fn clear_memory(&mut self) -> Result<()> {
        self.transceive(&CommandFrame::clear_memory())?;
        self.header = None;
        info!("Logger memory cleared");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Internal Methods
    // ------------------------------------------------------------------------

    /// Cached values are only served while connected.
    fn ensure_open(&self) -> Result<()> {
        match self.conn {
            Some(_) => Ok(()),
            None => Err(DriverError::NotConnected),
        }
    }

    fn transceive(&mut self, request: &CommandFrame) -> Result<ResponseFrame> {
        match self.exchange(request)? {
            Reply::Frame(frame) => Ok(frame),
            Reply::EndOfData => Err(DriverError::ProtocolMismatch {
                opcode: request.opcode(),
                expected: request.response_layout().prefix,
                actual: Vec::new(),
            }),
        }
    }

    /// One request/response round trip. Fatal errors drop the connection.
    fn exchange(&mut self, request: &CommandFrame) -> Result<Reply> {
        if self.transfer_open && !request.is_transfer_command() {
            return Err(DriverError::TransferInProgress {
                opcode: request.opcode(),
            });
        }
        let conn = self.conn.as_mut().ok_or(DriverError::NotConnected)?;
        let result = round_trip(conn, request);
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(
                    "Command {:#04X} failed, closing connection: {}",
                    request.opcode(),
                    e
                );
                self.drop_connection();
            }
        }
        result
    }

    fn drop_connection(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
        if self.transfer_open {
            self.transfer_open = false;
            self.transfer_interrupted = true;
        }
        self.header = None;
    }
}

impl Drop for DLogg {
    fn drop(&mut self) {
        self.close();
    }
}

fn round_trip(conn: &mut Connection, request: &CommandFrame) -> Result<Reply> {
    let bytes = request.encode();
    let layout = request.response_layout();

    conn.discard_input()?;
    conn.write(&bytes)?;

    // Echo first, so a wrong reply is detected before its body is consumed.
    let mut raw = conn.read(layout.prefix.len())?;
    layout.check_prefix(request.opcode(), &raw)?;
    raw.extend(conn.read(layout.len - raw.len())?);
    debug!("Transceive: {:02X?} --> {:02X?}", bytes, raw);

    decode_reply(request, &raw)
}

fn first_byte(frame: &ResponseFrame) -> Result<u8> {
    frame.payload.first().copied().ok_or_else(|| {
        DriverError::Decode(DecodeError::Truncated {
            offset: 0,
            needed: 1,
        })
    })
}
