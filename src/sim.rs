//! In-process D-LOGG simulator.
//!
//! [`SimulatedLogger`] answers requests the way a 1DL logger does and can be
//! plugged into a session with [`SimulatedLogger::opener`]. Clones share the
//! same device state, so a test can keep one handle to inspect the device
//! and inject faults while the session owns another.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, trace};

use crate::address::{Address, RING_SIZE};
use crate::codec::{
    CommandFrame, CMD_CLEAR_MEMORY, CMD_END_READ, CMD_FETCH_BLOCK, CMD_GET_CURRENT_DATA,
    CMD_GET_FIRMWARE_VERSION, CMD_GET_HEADER, CMD_GET_LOGGING_CRITERION, CMD_GET_MODE,
    CMD_GET_TYPE, CMD_SET_LOGGING_CRITERION, ERASED_BYTE,
};
use crate::definitions::{DeviceType, FirmwareVersion, Mode};
use crate::errors::Result;
use crate::records::{CURRENT_DATA_LEN, HEADER_LEN, INPUT_COUNT, SAMPLE_LEN};
use crate::session::{Opener, SessionConfig};
use crate::transport::{Connection, Link};

/// Pause before an empty read reports a timeout.
const IDLE_READ: Duration = Duration::from_millis(1);

/// Fault applied to the next reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Process the command but send nothing back.
    Stall,
    /// Send only the first `n` bytes of the reply.
    Truncate(usize),
    /// Flip one bit of the reply.
    FlipBit { byte: usize, bit: u8 },
    /// Send these bytes instead of the reply.
    Replace(Vec<u8>),
}

struct State {
    device_type: DeviceType,
    firmware: FirmwareVersion,
    mode: Mode,
    criterion: u8,
    header_id: u8,
    header_version: u8,
    /// Oldest stored logical position and number of stored samples.
    start: u32,
    count: u32,
    slots: HashMap<u16, Vec<u8>>,
    current: Vec<u8>,
    transfer_open: bool,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    requests: Vec<CommandFrame>,
    faults: VecDeque<Fault>,
    opens: usize,
}

/// Simulated 1DL logger.
#[derive(Clone)]
pub struct SimulatedLogger {
    state: Arc<Mutex<State>>,
}

impl Default for SimulatedLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLogger {
    /// A D-LOGG in 1DL mode with firmware 2.9 and empty memory.
    pub fn new() -> Self {
        let mut current = vec![0u8; CURRENT_DATA_LEN];
        // Input 1: 23.5 °C, input 2: digital on.
        current[0..2].copy_from_slice(&(0x2000u16 | 235).to_le_bytes());
        current[2..4].copy_from_slice(&0x9000u16.to_le_bytes());
        let state = State {
            device_type: DeviceType::DLogg1Dl,
            firmware: FirmwareVersion::from_raw(29),
            mode: Mode::OneDl,
            criterion: 0x8A,
            header_id: 0x01,
            header_version: 0x02,
            start: 0,
            count: 0,
            slots: HashMap::new(),
            current,
            transfer_open: false,
            rx: Vec::new(),
            tx: VecDeque::new(),
            requests: Vec::new(),
            faults: VecDeque::new(),
            opens: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_mode(self, mode: Mode) -> Self {
        self.state().mode = mode;
        self
    }

    pub fn with_firmware(self, raw: u8) -> Self {
        self.state().firmware = FirmwareVersion::from_raw(raw);
        self
    }

    /// Fill memory with `count` samples at logical positions `0..count`.
    pub fn with_samples(self, count: u32) -> Self {
        self.with_samples_at(0, count)
    }

    /// Fill memory with `count` samples starting at logical position `start`.
    pub fn with_samples_at(self, start: u32, count: u32) -> Self {
        {
            let mut state = self.state();
            let count = count.min(RING_SIZE);
            state.slots.clear();
            state.start = start % RING_SIZE;
            state.count = count;
            for position in start..start + count {
                let index = Address::from_position(position).index();
                state.slots.insert(index, sample_payload(position));
            }
        }
        self
    }

    /// Lock the device state. A panicked test thread does not poison the device.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Opener that connects a session to this device.
    pub fn opener(&self) -> Opener {
        let sim = self.clone();
        Box::new(move |cfg: &SessionConfig| -> Result<Connection> {
            sim.state().opens += 1;
            Ok(Connection::from_link(
                Box::new(sim.clone()),
                &cfg.port,
                cfg.baud_rate,
                cfg.timeout,
            ))
        })
    }

    /// Queue a fault for the next reply. Faults apply in the order queued.
    pub fn inject(&self, fault: Fault) {
        self.state().faults.push_back(fault);
    }

    pub fn stall_next_reply(&self) {
        self.inject(Fault::Stall);
    }

    /// Erase the slots from `position` onwards while the header keeps
    /// announcing them.
    pub fn erase_from(&self, position: u32) {
        let mut state = self.state();
        let end = state.start + state.count;
        for p in position..end {
            let index = Address::from_position(p).index();
            state.slots.remove(&index);
        }
    }

    /// Overwrite one input word of the live data.
    pub fn set_input_word(&self, index: usize, word: u16) {
        if index < INPUT_COUNT {
            let offset = index * 2;
            self.state().current[offset..offset + 2].copy_from_slice(&word.to_le_bytes());
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<CommandFrame> {
        self.state().requests.clone()
    }

    pub fn opcodes(&self) -> Vec<u8> {
        self.state().requests.iter().map(|r| r.opcode()).collect()
    }

    pub fn transfer_open(&self) -> bool {
        self.state().transfer_open
    }

    pub fn criterion_raw(&self) -> u8 {
        self.state().criterion
    }

    pub fn stored_samples(&self) -> u32 {
        self.state().count
    }

    pub fn opens(&self) -> usize {
        self.state().opens
    }
}

/// Payload the simulator stores at a logical position.
///
/// Samples are one minute apart starting at 2026-01-01 00:00:00.
pub fn sample_payload(position: u32) -> Vec<u8> {
    let mut payload = vec![0u8; SAMPLE_LEN];
    let temperature = 0x2000u16 | (200 + (position % 100) as u16);
    payload[0..2].copy_from_slice(&temperature.to_le_bytes());
    let flow = 0x3000u16 | (position % 0x0FFF) as u16;
    payload[2..4].copy_from_slice(&flow.to_le_bytes());
    payload[32..34].copy_from_slice(&((position as u16) & 0x1FFF).to_le_bytes());
    payload[34] = (position % 31) as u8;

    let minutes = position % 60;
    let hours = (position / 60) % 24;
    let day = 1 + (position / 1440) % 28;
    payload[55..61].copy_from_slice(&[0, minutes as u8, hours as u8, day as u8, 1, 26]);
    let ticks = (position * 6) & 0x00FF_FFFF;
    payload[61..64].copy_from_slice(&ticks.to_le_bytes()[..3]);
    payload
}

impl State {
    fn header_payload(&self) -> Vec<u8> {
        let mut payload = vec![0u8; HEADER_LEN];
        payload[0] = self.header_id;
        payload[1] = self.header_version;
        payload[5] = SAMPLE_LEN as u8;
        let (start, end) = if self.count == 0 {
            (Address::erased(), Address::erased())
        } else {
            (
                Address::from_position(self.start),
                Address::from_position(self.start + self.count - 1),
            )
        };
        payload[6..9].copy_from_slice(&start.to_bytes());
        payload[9..12].copy_from_slice(&end.to_bytes());
        payload
    }

    /// Reply bytes for one request, `None` when the device stays silent.
    fn respond(&mut self, request: &CommandFrame) -> Option<Vec<u8>> {
        let layout = request.response_layout();
        let payload = match request.opcode() {
            CMD_GET_TYPE => vec![self.device_type.code(), 0x00],
            CMD_GET_MODE => vec![self.mode.code()],
            CMD_GET_FIRMWARE_VERSION => vec![self.firmware.raw()],
            CMD_GET_LOGGING_CRITERION => {
                if !self.firmware.supports_logging_criterion() {
                    return None;
                }
                vec![self.criterion, 0x00]
            }
            CMD_SET_LOGGING_CRITERION => {
                self.criterion = *request.params().first()?;
                Vec::new()
            }
            CMD_GET_HEADER => self.header_payload(),
            CMD_GET_CURRENT_DATA => self.current.clone(),
            CMD_FETCH_BLOCK => {
                self.transfer_open = true;
                let params = request.params();
                let raw = [*params.first()?, *params.get(1)?, *params.get(2)?];
                let index = Address::from_bytes(raw, 0).ok()?.index();
                match self.slots.get(&index) {
                    Some(sample) => sample.clone(),
                    None => return Some(vec![ERASED_BYTE; layout.len]),
                }
            }
            CMD_END_READ => {
                self.transfer_open = false;
                Vec::new()
            }
            CMD_CLEAR_MEMORY => {
                self.slots.clear();
                self.count = 0;
                Vec::new()
            }
            _ => return None,
        };
        Some(layout.encode_reply(&payload))
    }

    fn apply_fault(&mut self, reply: Vec<u8>) -> Option<Vec<u8>> {
        match self.faults.pop_front() {
            None => Some(reply),
            Some(Fault::Stall) => None,
            Some(Fault::Truncate(n)) => Some(reply[..n.min(reply.len())].to_vec()),
            Some(Fault::FlipBit { byte, bit }) => {
                let mut reply = reply;
                if let Some(b) = reply.get_mut(byte) {
                    *b ^= 1 << (bit % 8);
                }
                Some(reply)
            }
            Some(Fault::Replace(bytes)) => Some(bytes),
        }
    }

    fn process(&mut self) {
        loop {
            match CommandFrame::parse(&self.rx) {
                Ok(Some((request, used))) => {
                    self.rx.drain(..used);
                    trace!("sim: request {:02X?}", request.encode());
                    let reply = self.respond(&request);
                    self.requests.push(request);
                    if let Some(reply) = reply.and_then(|r| self.apply_fault(r)) {
                        self.tx.extend(reply);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("sim: dropping unparseable input: {}", e);
                    self.rx.clear();
                    break;
                }
            }
        }
    }
}

impl Read for SimulatedLogger {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.tx.is_empty() {
            drop(state);
            std::thread::sleep(IDLE_READ);
            return Err(io::ErrorKind::TimedOut.into());
        }
        let n = buf.len().min(state.tx.len());
        for (slot, byte) in buf.iter_mut().zip(state.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedLogger {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        state.rx.extend_from_slice(buf);
        state.process();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Link for SimulatedLogger {
    fn discard_input(&mut self) -> io::Result<()> {
        self.state().tx.clear();
        Ok(())
    }
}
