use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("timeout: expected {expected} bytes, received {} ({received:02X?})", .received.len())]
    Timeout { expected: usize, received: Vec<u8> },
    #[error("frame length mismatch for command {opcode:#04X}: expected {expected} bytes, got {actual}")]
    FrameLength {
        opcode: u8,
        expected: usize,
        actual: usize,
    },
    #[error("checksum mismatch for command {opcode:#04X}: calculated {expected:#04X}, received {actual:#04X}")]
    FrameCorrupt { opcode: u8, expected: u8, actual: u8 },
    #[error("unexpected response to command {opcode:#04X}: expected {expected:02X?}, got {actual:02X?}")]
    ProtocolMismatch {
        opcode: u8,
        expected: Vec<u8>,
        actual: Vec<u8>,
    },
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("incomplete range from position {start}: requested {requested}, received {received} ({shortfall})")]
    IncompleteRange {
        start: u32,
        requested: usize,
        received: usize,
        shortfall: Shortfall,
    },
    #[error("not connected")]
    NotConnected,
    #[error("command {opcode:#04X} not allowed while a transfer is open; call fetch_end() first")]
    TransferInProgress { opcode: u8 },
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl DriverError {
    /// Whether the error leaves the byte stream in an unknown position.
    ///
    /// The session drops its connection after any fatal error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::Io(_)
                | DriverError::Serial(_)
                | DriverError::Timeout { .. }
                | DriverError::FrameLength { .. }
                | DriverError::FrameCorrupt { .. }
                | DriverError::ProtocolMismatch { .. }
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload truncated at offset {offset}: {needed} more bytes needed")]
    Truncated { offset: usize, needed: usize },
    #[error("invalid {field} at offset {offset}: {value:#04X}")]
    InvalidValue {
        offset: usize,
        field: &'static str,
        value: u32,
    },
}

impl DecodeError {
    /// Byte offset inside the payload where decoding failed.
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::Truncated { offset, .. } | DecodeError::InvalidValue { offset, .. } => {
                *offset
            }
        }
    }
}

/// Why a ranged fetch delivered fewer samples than requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortfall {
    /// The request reaches outside the range announced by the header. Nothing was sent.
    BeyondLog { available: usize },
    /// The device answered with its end-of-data marker before the range was complete.
    EndOfData,
    /// The device sent fewer samples than asked for, without the end-of-data marker.
    ShortBlock,
}

impl std::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shortfall::BeyondLog { available } => {
                write!(f, "only {available} samples available in the log")
            }
            Shortfall::EndOfData => write!(f, "device signalled end of data"),
            Shortfall::ShortBlock => write!(f, "device sent a short block"),
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
