//! Payload decoders for header, current data and stored samples.
//!
//! All functions operate on payloads that already passed frame validation
//! (echo prefix and checksum stripped). Offsets in [`DecodeError`] are
//! relative to the start of the payload.

use std::fmt;

use serde::Serialize;

use crate::address::Address;
use crate::errors::DecodeError;

/// Analog and digital inputs of the controller.
pub const INPUT_COUNT: usize = 16;
/// Switched outputs of the controller.
pub const OUTPUT_COUNT: usize = 13;
/// Speed-controlled outputs.
pub const PUMP_COUNT: usize = 4;

/// Payload length of a header reply.
pub const HEADER_LEN: usize = 12;
/// Payload length of a current-data reply.
pub const CURRENT_DATA_LEN: usize = 55;
/// Payload length of a stored sample.
pub const SAMPLE_LEN: usize = 64;

const OUTPUTS_OFFSET: usize = 32;
const PUMPS_OFFSET: usize = 34;
const HEAT_METER_OFFSET: usize = 38;
const DATETIME_OFFSET: usize = 55;
const TIMESTAMP_OFFSET: usize = 61;

fn take<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], DecodeError> {
    match data.get(offset..offset + N) {
        Some(bytes) => {
            let mut out = [0u8; N];
            out.copy_from_slice(bytes);
            Ok(out)
        }
        None => Err(DecodeError::Truncated {
            offset: data.len().min(offset),
            needed: offset + N - data.len(),
        }),
    }
}

fn expect_len(data: &[u8], len: usize) -> Result<(), DecodeError> {
    if data.len() < len {
        return Err(DecodeError::Truncated {
            offset: data.len(),
            needed: len - data.len(),
        });
    }
    Ok(())
}

/// 24-bit little-endian counter of ten-second ticks.
fn timestamp_seconds(bytes: [u8; 3]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) * 10
}

/// Magnitude of a sign-flagged value stored as two's complement in `mask` bits.
fn signed_magnitude(word: u16, mask: u16) -> i32 {
    if word & 0x8000 != 0 {
        -((((word & mask) ^ mask) + 1) as i32)
    } else {
        (word & mask) as i32
    }
}

// ============================================================================
// Header
// ============================================================================

/// Description of the samples currently stored in the logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderInfo {
    pub identifier: u8,
    pub version: u8,
    pub timestamp_s: u32,
    pub start: Address,
    pub end: Address,
    pub sample_count: u32,
}

impl HeaderInfo {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        expect_len(payload, HEADER_LEN)?;
        let start = Address::from_bytes(take(payload, 6)?, 6)?;
        let end = Address::from_bytes(take(payload, 9)?, 9)?;
        if start.is_erased() != end.is_erased() {
            return Err(DecodeError::InvalidValue {
                offset: if start.is_erased() { 6 } else { 9 },
                field: "address",
                value: 0xFF_FFFF,
            });
        }
        Ok(Self {
            identifier: payload[0],
            version: payload[1],
            timestamp_s: timestamp_seconds(take(payload, 2)?),
            start,
            end,
            sample_count: Address::span(start, end),
        })
    }

    /// Logical position of the oldest stored sample.
    pub fn start_position(&self) -> u32 {
        if self.start.is_erased() {
            0
        } else {
            self.start.index() as u32
        }
    }

    /// One past the logical position of the newest stored sample.
    pub fn end_position(&self) -> u32 {
        self.start_position() + self.sample_count
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}

impl fmt::Display for HeaderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "identifier={:#04X} version={:#04X} timestamp={}s start={} end={} samples={}",
            self.identifier, self.version, self.timestamp_s, self.start, self.end, self.sample_count
        )
    }
}

// ============================================================================
// Measurement values
// ============================================================================

/// Decoded value of one controller input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum InputValue {
    /// Input not configured. Distinct from a zero reading.
    Unused,
    Digital(bool),
    /// Degrees Celsius.
    Temperature(f32),
    /// Room sensor in degrees Celsius with its mode selector (0-3).
    RoomTemperature { celsius: f32, mode: u8 },
    /// Litres per hour.
    VolumeFlow(f32),
    /// Watts per square metre.
    Irradiance(f32),
}

impl InputValue {
    pub fn unit(&self) -> &'static str {
        match self {
            InputValue::Unused | InputValue::Digital(_) => "",
            InputValue::Temperature(_) | InputValue::RoomTemperature { .. } => "°C",
            InputValue::VolumeFlow(_) => "l/h",
            InputValue::Irradiance(_) => "W/m²",
        }
    }

    /// Numeric reading, `None` for unused inputs.
    pub fn value(&self) -> Option<f32> {
        match *self {
            InputValue::Unused => None,
            InputValue::Digital(on) => Some(if on { 1.0 } else { 0.0 }),
            InputValue::Temperature(v)
            | InputValue::VolumeFlow(v)
            | InputValue::Irradiance(v) => Some(v),
            InputValue::RoomTemperature { celsius, .. } => Some(celsius),
        }
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            None => write!(f, "-"),
            Some(v) => write!(f, "{v}{}", self.unit()),
        }
    }
}

/// One input word as stored by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Input {
    pub raw: u16,
    pub value: InputValue,
}

impl Input {
    pub fn decode(word: u16, offset: usize) -> Result<Self, DecodeError> {
        let signal_type = (word & 0x7000) >> 12;
        let value = match signal_type {
            0 => InputValue::Unused,
            1 => InputValue::Digital(word & 0x8000 != 0),
            2 => InputValue::Temperature(signed_magnitude(word, 0x0FFF) as f32 / 10.0),
            3 => InputValue::VolumeFlow(signed_magnitude(word, 0x0FFF) as f32 * 4.0),
            6 => InputValue::Irradiance(signed_magnitude(word, 0x0FFF) as f32),
            7 => InputValue::RoomTemperature {
                celsius: signed_magnitude(word, 0x01FF) as f32 / 10.0,
                mode: ((word & 0x0600) >> 9) as u8,
            },
            other => {
                return Err(DecodeError::InvalidValue {
                    offset: offset + 1,
                    field: "input signal type",
                    value: other as u32,
                })
            }
        };
        Ok(Self { raw: word, value })
    }
}

/// Speed stage of a speed-controlled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PumpSpeed {
    pub raw: u8,
}

impl PumpSpeed {
    /// Speed stage (0-31).
    pub fn stage(self) -> u8 {
        self.raw & 0x1F
    }

    /// The controller drives the speed when bit 7 is clear.
    pub fn controller_active(self) -> bool {
        self.raw & 0x80 == 0
    }
}

/// Output word; bits above the 13 outputs are kept as received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Outputs {
    pub raw: u16,
}

impl Outputs {
    pub fn get(self, index: usize) -> Option<bool> {
        (index < OUTPUT_COUNT).then(|| self.raw & (1 << index) != 0)
    }

    pub fn states(self) -> [bool; OUTPUT_COUNT] {
        let mut out = [false; OUTPUT_COUNT];
        for (i, state) in out.iter_mut().enumerate() {
            *state = self.raw & (1 << i) != 0;
        }
        out
    }
}

/// Inputs, outputs and speeds shared by current data and stored samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurements {
    pub inputs: [Input; INPUT_COUNT],
    pub outputs: Outputs,
    pub pump_speeds: [PumpSpeed; PUMP_COUNT],
    /// Heat meter activation flags.
    pub heat_meters: u8,
}

impl Measurements {
    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut inputs = [Input {
            raw: 0,
            value: InputValue::Unused,
        }; INPUT_COUNT];
        for (i, input) in inputs.iter_mut().enumerate() {
            let offset = i * 2;
            *input = Input::decode(u16::from_le_bytes(take(data, offset)?), offset)?;
        }
        let outputs = Outputs {
            raw: u16::from_le_bytes(take(data, OUTPUTS_OFFSET)?),
        };
        let speeds: [u8; PUMP_COUNT] = take(data, PUMPS_OFFSET)?;
        let [heat_meters] = take::<1>(data, HEAT_METER_OFFSET)?;
        Ok(Self {
            inputs,
            outputs,
            pump_speeds: speeds.map(|raw| PumpSpeed { raw }),
            heat_meters,
        })
    }
}

impl fmt::Display for Measurements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inputs: Vec<String> = self.inputs.iter().map(|i| i.value.to_string()).collect();
        let outputs: Vec<&str> = self
            .outputs
            .states()
            .iter()
            .map(|&on| if on { "1" } else { "0" })
            .collect();
        let speeds: Vec<String> = self
            .pump_speeds
            .iter()
            .map(|s| s.stage().to_string())
            .collect();
        write!(
            f,
            "inputs=[{}] outputs=[{}] speeds=[{}]",
            inputs.join(", "),
            outputs.join(""),
            speeds.join(", ")
        )
    }
}

// ============================================================================
// Current data and stored samples
// ============================================================================

/// Live snapshot of the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentData {
    pub measurements: Measurements,
    pub raw: Vec<u8>,
}

impl CurrentData {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        expect_len(payload, CURRENT_DATA_LEN)?;
        Ok(Self {
            measurements: Measurements::decode(payload)?,
            raw: payload.to_vec(),
        })
    }
}

/// Wall clock time stored with a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl DateTime {
    fn decode(bytes: [u8; 6], offset: usize) -> Result<Self, DecodeError> {
        let [seconds, minutes, hours, day, month, year] = bytes;
        let checks: [(u8, std::ops::RangeInclusive<u8>, &'static str); 5] = [
            (seconds, 0..=59, "seconds"),
            (minutes, 0..=59, "minutes"),
            (hours, 0..=23, "hours"),
            (day, 1..=31, "day"),
            (month, 1..=12, "month"),
        ];
        for (i, (value, range, field)) in checks.into_iter().enumerate() {
            if !range.contains(&value) {
                return Err(DecodeError::InvalidValue {
                    offset: offset + i,
                    field,
                    value: value as u32,
                });
            }
        }
        Ok(Self {
            year: 2000 + year as u16,
            month,
            day,
            hours,
            minutes,
            seconds,
        })
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hours, self.minutes, self.seconds
        )
    }
}

/// One historical sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Logical position; increases monotonically across the ring wrap.
    pub position: u32,
    pub address: Address,
    pub measurements: Measurements,
    pub datetime: DateTime,
    pub timestamp_s: u32,
    pub raw: Vec<u8>,
}

impl Sample {
    pub fn decode(position: u32, payload: &[u8]) -> Result<Self, DecodeError> {
        expect_len(payload, SAMPLE_LEN)?;
        Ok(Self {
            position,
            address: Address::from_position(position),
            measurements: Measurements::decode(payload)?,
            datetime: DateTime::decode(take(payload, DATETIME_OFFSET)?, DATETIME_OFFSET)?,
            timestamp_s: timestamp_seconds(take(payload, TIMESTAMP_OFFSET)?),
            raw: payload.to_vec(),
        })
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ({}s) {}",
            self.position, self.datetime, self.timestamp_s, self.measurements
        )
    }
}
