//! Value types carried in command and response payloads.

use crate::constants::*;
use crate::error::ValidationError;

/// A position in percent, 0 (open) to 100 (closed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "i64", into = "u8"))]
pub struct Percentage(u8);

impl Percentage {
    /// Fully open.
    pub const OPEN: Percentage = Percentage(0);
    /// Fully closed.
    pub const CLOSED: Percentage = Percentage(MAX_PERCENT);

    /// Create a percentage, rejecting values above 100.
    pub fn new(value: u8) -> Result<Self, ValidationError> {
        Self::try_from(i64::from(value))
    }

    /// Get the raw value.
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Percentage {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if (0..=i64::from(MAX_PERCENT)).contains(&value) {
            Ok(Percentage(value as u8))
        } else {
            Err(ValidationError {
                field: "percentage",
                value,
                min: 0,
                max: i64::from(MAX_PERCENT),
            })
        }
    }
}

impl From<Percentage> for u8 {
    fn from(p: Percentage) -> u8 {
        p.0
    }
}

impl std::fmt::Display for Percentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Battery charge in percent.
///
/// Readings above 100 are clamped; the firmware reports slightly above 100
/// while charging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatteryLevel(u8);

impl BatteryLevel {
    /// Build from a raw reading, clamping to 100.
    pub fn from_raw(raw: u8) -> Self {
        BatteryLevel(raw.min(MAX_PERCENT))
    }

    /// Get the percentage.
    pub fn percent(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for BatteryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Light sensor level on the device's 0-9 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LightLevel(u8);

impl LightLevel {
    /// Create a level for a command, rejecting values above 9.
    pub fn new(value: u8) -> Result<Self, ValidationError> {
        if value <= MAX_LIGHT_LEVEL {
            Ok(LightLevel(value))
        } else {
            Err(ValidationError {
                field: "light level",
                value: i64::from(value),
                min: 0,
                max: i64::from(MAX_LIGHT_LEVEL),
            })
        }
    }

    /// Build from a sensor reading, clamping to 9.
    pub fn from_raw(raw: u8) -> Self {
        LightLevel(raw.min(MAX_LIGHT_LEVEL))
    }

    /// Get the raw level.
    pub fn value(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for LightLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.0, MAX_LIGHT_LEVEL)
    }
}

/// Four-digit device PIN used by `Login`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pin(u16);

impl Pin {
    /// Create a PIN, rejecting values above 9999.
    pub fn new(value: u16) -> Result<Self, ValidationError> {
        if value <= MAX_PIN {
            Ok(Pin(value))
        } else {
            Err(ValidationError {
                field: "pin",
                value: i64::from(value),
                min: 0,
                max: i64::from(MAX_PIN),
            })
        }
    }

    /// Get the PIN value.
    pub fn value(self) -> u16 {
        self.0
    }
}

// Keep PINs out of logs.
impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pin(****)")
    }
}

/// Motor configuration flags reported alongside the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionFlags {
    /// Motor direction is reversed.
    pub reversed: bool,
    /// Top travel limit has been set.
    pub top_limit_set: bool,
    /// Bottom travel limit has been set.
    pub bottom_limit_set: bool,
    /// A light sensor is attached.
    pub has_light_sensor: bool,
}

impl From<u8> for PositionFlags {
    fn from(bits: u8) -> Self {
        PositionFlags {
            reversed: bits & FLAG_REVERSED != 0,
            top_limit_set: bits & FLAG_TOP_LIMIT != 0,
            bottom_limit_set: bits & FLAG_BOTTOM_LIMIT != 0,
            has_light_sensor: bits & FLAG_LIGHT_SENSOR != 0,
        }
    }
}

impl From<PositionFlags> for u8 {
    fn from(flags: PositionFlags) -> u8 {
        let mut bits = 0;
        if flags.reversed {
            bits |= FLAG_REVERSED;
        }
        if flags.top_limit_set {
            bits |= FLAG_TOP_LIMIT;
        }
        if flags.bottom_limit_set {
            bits |= FLAG_BOTTOM_LIMIT;
        }
        if flags.has_light_sensor {
            bits |= FLAG_LIGHT_SENSOR;
        }
        bits
    }
}

/// Position reply: where the blind is and how the motor is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionReport {
    /// Configuration flags.
    pub flags: PositionFlags,
    /// Speed setting in RPM.
    pub speed: u8,
    /// Current position, or `None` when the travel limits are not set.
    pub position: Option<Percentage>,
}

/// Snapshot of a blind, read with one query per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceState {
    /// Battery charge.
    pub battery: BatteryLevel,
    /// Light sensor level.
    pub light: LightLevel,
    /// Position, `None` when the limits are not set.
    pub position: Option<Percentage>,
}

impl DeviceState {
    /// Fully closed (position 100).
    pub fn is_closed(&self) -> bool {
        self.position == Some(Percentage::CLOSED)
    }

    /// Anything other than fully closed.
    pub fn is_open(&self) -> bool {
        !self.is_closed()
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let position = match self.position {
            Some(p) => p.to_string(),
            None => "unknown".to_string(),
        };
        write!(
            f,
            "{}, position {}, battery {}, light {}",
            if self.is_open() { "OPEN" } else { "CLOSED" },
            position,
            self.battery,
            self.light
        )
    }
}
