//! Enumerated configuration values of the 1DL dialect.

use std::fmt;

use serde::Serialize;

use crate::errors::DecodeError;

/// Hardware type reported by the get-type command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceType {
    Bl232,
    BlNet,
    /// BL232 or D-LOGG with one data line.
    DLogg1Dl,
    /// BL232 or D-LOGG with two data lines.
    DLogg2Dl,
}

impl DeviceType {
    pub fn from_code(code: u8, offset: usize) -> Result<Self, DecodeError> {
        match code {
            0xA2 => Ok(DeviceType::Bl232),
            0xA3 => Ok(DeviceType::BlNet),
            0xA8 => Ok(DeviceType::DLogg1Dl),
            0xD1 => Ok(DeviceType::DLogg2Dl),
            value => Err(DecodeError::InvalidValue {
                offset,
                field: "device type",
                value: value as u32,
            }),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            DeviceType::Bl232 => 0xA2,
            DeviceType::BlNet => 0xA3,
            DeviceType::DLogg1Dl => 0xA8,
            DeviceType::DLogg2Dl => 0xD1,
        }
    }
}

/// Data line mode of the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Mode {
    Bl232,
    OneDl,
    TwoDl,
    Can,
}

impl Mode {
    pub fn from_code(code: u8, offset: usize) -> Result<Self, DecodeError> {
        match code {
            0xA2 => Ok(Mode::Bl232),
            0xA8 => Ok(Mode::OneDl),
            0xD1 => Ok(Mode::TwoDl),
            0xDC => Ok(Mode::Can),
            value => Err(DecodeError::InvalidValue {
                offset,
                field: "mode",
                value: value as u32,
            }),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Mode::Bl232 => 0xA2,
            Mode::OneDl => 0xA8,
            Mode::TwoDl => 0xD1,
            Mode::Can => 0xDC,
        }
    }
}

/// Firmware version, transmitted in tenths (`29` is version 2.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FirmwareVersion(u8);

impl FirmwareVersion {
    /// First firmware answering the logging criterion query.
    pub const LOGGING_CRITERION_MIN: FirmwareVersion = FirmwareVersion(29);

    pub fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    pub fn major(self) -> u8 {
        self.0 / 10
    }

    pub fn minor(self) -> u8 {
        self.0 % 10
    }

    pub fn supports_logging_criterion(self) -> bool {
        self >= Self::LOGGING_CRITERION_MIN
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

/// Condition under which the logger stores a new sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LoggingCriterion {
    /// Log whenever a temperature changed by this many tenths of a kelvin.
    TemperatureDelta { tenths_kelvin: u8 },
    /// Log at a fixed interval.
    Interval { seconds: u16 },
}

impl LoggingCriterion {
    pub fn from_raw(raw: u8, offset: usize) -> Result<Self, DecodeError> {
        match raw {
            5..=120 => Ok(LoggingCriterion::TemperatureDelta { tenths_kelvin: raw }),
            129..=248 => Ok(LoggingCriterion::Interval {
                seconds: (raw as u16 - 128) * 20,
            }),
            value => Err(DecodeError::InvalidValue {
                offset,
                field: "logging criterion",
                value: value as u32,
            }),
        }
    }

    /// Temperature delta in kelvin (0.5 to 12.0).
    pub fn temperature_delta(delta_kelvin: f32) -> Option<Self> {
        let tenths = (delta_kelvin * 10.0).round();
        if (5.0..=120.0).contains(&tenths) {
            Some(LoggingCriterion::TemperatureDelta {
                tenths_kelvin: tenths as u8,
            })
        } else {
            None
        }
    }

    /// Interval in seconds, a multiple of 20 between 20 and 2400.
    pub fn interval(seconds: u16) -> Option<Self> {
        if seconds % 20 == 0 && (20..=2400).contains(&seconds) {
            Some(LoggingCriterion::Interval { seconds })
        } else {
            None
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            LoggingCriterion::TemperatureDelta { tenths_kelvin } => tenths_kelvin,
            LoggingCriterion::Interval { seconds } => (seconds / 20 + 128) as u8,
        }
    }
}

impl fmt::Display for LoggingCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggingCriterion::TemperatureDelta { tenths_kelvin } => {
                write!(f, "{}.{}K", tenths_kelvin / 10, tenths_kelvin % 10)
            }
            LoggingCriterion::Interval { seconds } => write!(f, "{seconds}s"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn mode_codes() {
        assert_eq!(Mode::from_code(0xA8, 0).unwrap(), Mode::OneDl);
        assert_eq!(Mode::from_code(0xDC, 0).unwrap(), Mode::Can);
        let err = Mode::from_code(0x42, 0).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidValue {
                offset: 0,
                field: "mode",
                value: 0x42
            }
        );
    }

    #[test]
    fn device_type_codes() {
        for t in [
            DeviceType::Bl232,
            DeviceType::BlNet,
            DeviceType::DLogg1Dl,
            DeviceType::DLogg2Dl,
        ] {
            assert_eq!(DeviceType::from_code(t.code(), 2).unwrap(), t);
        }
        assert_eq!(DeviceType::from_code(0x00, 2).unwrap_err().offset(), 2);
    }

    #[test]
    fn firmware_display_and_gate() {
        let fw = FirmwareVersion::from_raw(28);
        assert_eq!(fw.to_string(), "2.8");
        assert!(!fw.supports_logging_criterion());
        assert!(FirmwareVersion::from_raw(31).supports_logging_criterion());
    }

    #[test]
    fn criterion_boundaries() {
        assert!(LoggingCriterion::from_raw(4, 1).is_err());
        assert_eq!(
            LoggingCriterion::from_raw(5, 1).unwrap(),
            LoggingCriterion::TemperatureDelta { tenths_kelvin: 5 }
        );
        assert!(LoggingCriterion::from_raw(121, 1).is_err());
        assert!(LoggingCriterion::from_raw(128, 1).is_err());
        assert_eq!(
            LoggingCriterion::from_raw(129, 1).unwrap(),
            LoggingCriterion::Interval { seconds: 20 }
        );
        assert_eq!(
            LoggingCriterion::from_raw(248, 1).unwrap(),
            LoggingCriterion::Interval { seconds: 2400 }
        );
        assert!(LoggingCriterion::from_raw(249, 1).is_err());
    }

    #[test]
    fn criterion_display() {
        assert_eq!(
            LoggingCriterion::temperature_delta(1.2).unwrap().to_string(),
            "1.2K"
        );
        assert_eq!(LoggingCriterion::interval(60).unwrap().to_string(), "60s");
        assert!(LoggingCriterion::interval(30).is_none());
        assert!(LoggingCriterion::temperature_delta(20.0).is_none());
    }

    proptest! {
        #[test]
        fn valid_raw_criteria_round_trip(raw in any::<u8>()) {
            if let Ok(c) = LoggingCriterion::from_raw(raw, 0) {
                prop_assert_eq!(c.to_raw(), raw);
            }
        }
    }
}
