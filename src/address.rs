//! Ring addresses of the logger memory.
//!
//! The 1DL logger stores samples in a ring of 8192 slots. Each slot is
//! addressed on the wire by three bytes:
//!
//! ```text
//! byte 0: bits 0-1 of the index in bits 6-7
//! byte 1: bits 2-8 of the index in bits 1-7
//! byte 2: bits 9-12 of the index
//! ```
//!
//! An erased memory reports `FF FF FF` for both header addresses.

use serde::Serialize;

use crate::errors::DecodeError;

/// Number of sample slots in the logger ring.
pub const RING_SIZE: u32 = 8192;

const ERASED: [u8; 3] = [0xFF; 3];

/// A slot address in the logger ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Address {
    index: u16,
    raw: [u8; 3],
}

impl Address {
    /// Address of the ring slot a logical position maps to.
    pub fn from_position(position: u32) -> Self {
        let index = (position % RING_SIZE) as u16;
        Self {
            index,
            raw: Self::encode(index),
        }
    }

    /// Decode a wire address. `offset` is only used for error reporting.
    pub fn from_bytes(raw: [u8; 3], offset: usize) -> Result<Self, DecodeError> {
        if raw == ERASED {
            return Ok(Self::erased());
        }
        if raw[2] > 0x0F {
            return Err(DecodeError::InvalidValue {
                offset: offset + 2,
                field: "address",
                value: raw[2] as u32,
            });
        }
        let index = (raw[0] >> 6) as u16 + ((raw[1] as u16) << 1) + ((raw[2] as u16) << 9);
        if index as u32 >= RING_SIZE {
            return Err(DecodeError::InvalidValue {
                offset,
                field: "address",
                value: u32::from_le_bytes([raw[0], raw[1], raw[2], 0]),
            });
        }
        Ok(Self { index, raw })
    }

    /// The address an erased logger reports.
    pub fn erased() -> Self {
        Self {
            index: u16::MAX,
            raw: ERASED,
        }
    }

    pub fn is_erased(&self) -> bool {
        self.raw == ERASED
    }

    /// Slot index in `0..RING_SIZE`. Meaningless for an erased address.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Bytes as sent on the wire.
    pub fn to_bytes(&self) -> [u8; 3] {
        self.raw
    }

    fn encode(index: u16) -> [u8; 3] {
        [
            ((index << 6) & 0xFF) as u8,
            ((index >> 1) & 0xFE) as u8,
            ((index >> 9) & 0xFF) as u8,
        ]
    }

    /// Number of samples between `start` and `end`, both inclusive, following the ring.
    pub fn span(start: Address, end: Address) -> u32 {
        if start.is_erased() && end.is_erased() {
            return 0;
        }
        let (start, end) = (start.index as u32, end.index as u32);
        if end >= start {
            end - start + 1
        } else {
            end + RING_SIZE - start + 1
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_erased() {
            write!(f, "erased")
        } else {
            write!(f, "{}", self.index)
        }
    }
}
