//! Frame codec for the 1DL dialect.
//!
//! Requests are a command byte followed by optional parameters and, for some
//! commands, an additive checksum. Replies have a fixed length per command:
//!
//! ```text
//! [echo prefix][payload][checksum]
//! ```
//!
//! where both the echo prefix and the checksum are optional and depend on
//! the command. The checksum is the sum of the covered bytes modulo 256.
//! Because lengths are implied by the command, a reply can be read with
//! exact-length reads and nothing beyond it is ever consumed.

use crate::address::Address;
use crate::errors::{DriverError, Result};
use crate::records::{CURRENT_DATA_LEN, HEADER_LEN, SAMPLE_LEN};

// ============================================================================
// Constants
// ============================================================================

pub const CMD_GET_TYPE: u8 = 0x20;
pub const CMD_GET_MODE: u8 = 0x81;
pub const CMD_GET_FIRMWARE_VERSION: u8 = 0x82;
pub const CMD_GET_LOGGING_CRITERION: u8 = 0x95; // firmware 2.9+
pub const CMD_SET_LOGGING_CRITERION: u8 = 0x96;
pub const CMD_GET_HEADER: u8 = 0xAA;
pub const CMD_GET_CURRENT_DATA: u8 = 0xAB;
pub const CMD_FETCH_BLOCK: u8 = 0xAC;
pub const CMD_END_READ: u8 = 0xAD;
pub const CMD_CLEAR_MEMORY: u8 = 0xAF;

const GET_TYPE_PARAMS: [u8; 6] = [0x10, 0x18, 0x00, 0x00, 0x00, 0x00];
const TYPE_REPLY_PREFIX: [u8; 2] = [0x21, 0x43];
const CURRENT_DATA_MARKER: u8 = 0x80;

/// Samples the device returns per fetch command in this dialect.
pub const MAX_SAMPLES_PER_FETCH: u8 = 1;

/// Byte an erased memory slot reads back as.
pub const ERASED_BYTE: u8 = 0xFF;

/// Additive checksum used by requests and replies.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

// ============================================================================
// Requests
// ============================================================================

/// A request to the logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    opcode: u8,
    params: Vec<u8>,
    checksummed: bool,
}

impl CommandFrame {
    fn new(opcode: u8, params: Vec<u8>, checksummed: bool) -> Self {
        Self {
            opcode,
            params,
            checksummed,
        }
    }

    pub fn get_type() -> Self {
        Self::new(CMD_GET_TYPE, GET_TYPE_PARAMS.to_vec(), true)
    }

    pub fn get_mode() -> Self {
        Self::new(CMD_GET_MODE, Vec::new(), false)
    }

    pub fn get_firmware_version() -> Self {
        Self::new(CMD_GET_FIRMWARE_VERSION, Vec::new(), false)
    }

    pub fn get_logging_criterion() -> Self {
        Self::new(CMD_GET_LOGGING_CRITERION, Vec::new(), false)
    }

    pub fn set_logging_criterion(raw: u8) -> Self {
        Self::new(CMD_SET_LOGGING_CRITERION, vec![raw], false)
    }

    pub fn get_header() -> Self {
        Self::new(CMD_GET_HEADER, Vec::new(), false)
    }

    pub fn get_current_data() -> Self {
        Self::new(CMD_GET_CURRENT_DATA, Vec::new(), false)
    }

    /// Read one stored sample at `address`.
    pub fn fetch_block(address: Address) -> Self {
        let mut params = address.to_bytes().to_vec();
        params.push(MAX_SAMPLES_PER_FETCH);
        Self::new(CMD_FETCH_BLOCK, params, true)
    }

    pub fn end_read() -> Self {
        Self::new(CMD_END_READ, Vec::new(), false)
    }

    pub fn clear_memory() -> Self {
        Self::new(CMD_CLEAR_MEMORY, Vec::new(), false)
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// Commands that are valid while a ranged transfer is open.
    pub fn is_transfer_command(&self) -> bool {
        matches!(self.opcode, CMD_FETCH_BLOCK | CMD_END_READ)
    }

    /// Wire bytes of the request.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.params.len());
        out.push(self.opcode);
        out.extend_from_slice(&self.params);
        if self.checksummed {
            out.push(checksum(&out));
        }
        out
    }

    /// Parse a request from the head of `bytes`.
    ///
    /// Returns `Ok(None)` while the request is incomplete, otherwise the frame
    /// and the number of bytes it occupied.
    pub fn parse(bytes: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(&opcode) = bytes.first() else {
            return Ok(None);
        };
        let (params_len, checksummed) = match opcode {
            CMD_GET_TYPE => (GET_TYPE_PARAMS.len(), true),
            CMD_FETCH_BLOCK => (4, true),
            CMD_SET_LOGGING_CRITERION => (1, false),
            CMD_GET_MODE | CMD_GET_FIRMWARE_VERSION | CMD_GET_LOGGING_CRITERION
            | CMD_GET_HEADER | CMD_GET_CURRENT_DATA | CMD_END_READ | CMD_CLEAR_MEMORY => {
                (0, false)
            }
            other => {
                return Err(DriverError::ProtocolMismatch {
                    opcode: other,
                    expected: Vec::new(),
                    actual: vec![other],
                })
            }
        };
        let total = 1 + params_len + usize::from(checksummed);
        if bytes.len() < total {
            return Ok(None);
        }
        if checksummed {
            let expected = checksum(&bytes[..total - 1]);
            let actual = bytes[total - 1];
            if expected != actual {
                return Err(DriverError::FrameCorrupt {
                    opcode,
                    expected,
                    actual,
                });
            }
        }
        let frame = Self::new(opcode, bytes[1..1 + params_len].to_vec(), checksummed);
        Ok(Some((frame, total)))
    }

    /// Shape of the reply the device sends for this request.
    pub fn response_layout(&self) -> ResponseLayout {
        match self.opcode {
            CMD_GET_TYPE => ResponseLayout {
                prefix: TYPE_REPLY_PREFIX.to_vec(),
                len: 5,
                checksum: Some(Coverage::AfterPrefix),
                end_marker: false,
            },
            CMD_GET_LOGGING_CRITERION => ResponseLayout::echo(vec![CMD_GET_LOGGING_CRITERION], 3),
            CMD_SET_LOGGING_CRITERION => ResponseLayout::echo(self.params.clone(), 1),
            CMD_GET_HEADER => ResponseLayout {
                prefix: Vec::new(),
                len: HEADER_LEN + 1,
                checksum: Some(Coverage::All),
                end_marker: false,
            },
            CMD_GET_CURRENT_DATA => ResponseLayout {
                prefix: vec![CURRENT_DATA_MARKER],
                len: 1 + CURRENT_DATA_LEN + 1,
                checksum: Some(Coverage::All),
                end_marker: false,
            },
            CMD_FETCH_BLOCK => ResponseLayout {
                prefix: Vec::new(),
                len: SAMPLE_LEN * MAX_SAMPLES_PER_FETCH as usize + 1,
                checksum: Some(Coverage::All),
                end_marker: true,
            },
            CMD_END_READ | CMD_CLEAR_MEMORY => ResponseLayout::echo(vec![self.opcode], 1),
            _ => ResponseLayout::echo(Vec::new(), 1),
        }
    }
}

// ============================================================================
// Replies
// ============================================================================

/// Bytes covered by a reply checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// Every byte before the checksum.
    All,
    /// The bytes between the echo prefix and the checksum.
    AfterPrefix,
}

/// Expected shape of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLayout {
    /// Bytes the reply must start with.
    pub prefix: Vec<u8>,
    /// Total reply length including prefix and checksum.
    pub len: usize,
    pub checksum: Option<Coverage>,
    /// An all-`0xFF` reply means the device has no data at the requested slot.
    pub end_marker: bool,
}

impl ResponseLayout {
    fn echo(prefix: Vec<u8>, len: usize) -> Self {
        Self {
            prefix,
            len,
            checksum: None,
            end_marker: false,
        }
    }

    pub fn payload_len(&self) -> usize {
        self.len - self.prefix.len() - usize::from(self.checksum.is_some())
    }

    /// Build a valid reply around `payload`.
    ///
    /// Used by the simulator; the device does the same on its side.
    pub fn encode_reply(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(payload);
        match self.checksum {
            Some(Coverage::All) => out.push(checksum(&out)),
            Some(Coverage::AfterPrefix) => out.push(checksum(&out[self.prefix.len()..])),
            None => {}
        }
        out
    }

    /// Check the leading bytes of a reply against the expected echo.
    pub fn check_prefix(&self, opcode: u8, head: &[u8]) -> Result<()> {
        let n = self.prefix.len().min(head.len());
        if head[..n] != self.prefix[..n] {
            return Err(DriverError::ProtocolMismatch {
                opcode,
                expected: self.prefix.clone(),
                actual: head[..n].to_vec(),
            });
        }
        Ok(())
    }
}

/// A reply that passed length, echo and checksum validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub opcode: u8,
    /// Reply bytes without echo prefix and checksum.
    pub payload: Vec<u8>,
    pub checksum_verified: bool,
}

/// Outcome of decoding a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Frame(ResponseFrame),
    /// The device reported an erased slot.
    EndOfData,
}

/// Validate a complete reply to `request`.
pub fn decode_reply(request: &CommandFrame, raw: &[u8]) -> Result<Reply> {
    let layout = request.response_layout();
    let opcode = request.opcode();
    if raw.len() != layout.len {
        return Err(DriverError::FrameLength {
            opcode,
            expected: layout.len,
            actual: raw.len(),
        });
    }
    if layout.end_marker && raw.iter().all(|&b| b == ERASED_BYTE) {
        return Ok(Reply::EndOfData);
    }
    layout.check_prefix(opcode, raw)?;

    let body_end = raw.len() - usize::from(layout.checksum.is_some());
    if let Some(coverage) = layout.checksum {
        let covered = match coverage {
            Coverage::All => &raw[..body_end],
            Coverage::AfterPrefix => &raw[layout.prefix.len()..body_end],
        };
        let expected = checksum(covered);
        let actual = raw[body_end];
        if expected != actual {
            return Err(DriverError::FrameCorrupt {
                opcode,
                expected,
                actual,
            });
        }
    }

    Ok(Reply::Frame(ResponseFrame {
        opcode,
        payload: raw[layout.prefix.len()..body_end].to_vec(),
        checksum_verified: layout.checksum.is_some(),
    }))
}
