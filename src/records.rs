//! Record types shared by every stage of the control pipeline.
//!
//! ```text
//!  Reading ──▶ Baseline ──▶ Signal(System) ─┐
//!                                           ├─▶ Signal(Filter) ──▶ relay
//!                          Signal(User) ────┘
//! ```
//!
//! Records are immutable once appended.  Corrections are made by appending
//! a newer record; consumers always read the most recent entry of a log.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Where a reading was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Indoor,
    Outdoor,
}

impl Source {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Indoor => "indoor",
            Self::Outdoor => "outdoor",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ParseRecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "indoor" => Ok(Self::Indoor),
            "outdoor" => Ok(Self::Outdoor),
            _ => Err(ParseRecordError::UnknownSource),
        }
    }
}

/// Identifies one physical sensor within a [`Source`] population.
pub type SensorId = u16;

/// One particulate sample.  Temperature and humidity ride along for the
/// dashboard; the control logic only looks at `pm25`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    /// PM2.5 concentration (µg/m³).
    pub pm25: f64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub source: Source,
    /// Which sensor of `source` took the sample.  Deployments with a single
    /// sensor per source leave it at 0.
    #[serde(default)]
    pub sensor: SensorId,
}

impl Reading {
    /// A reading from sensor 0 carrying only the fields the control logic
    /// needs.
    pub fn pm25(timestamp: DateTime<Utc>, pm25: f64, source: Source) -> Self {
        Self {
            timestamp,
            pm25,
            temperature: None,
            humidity: None,
            source,
            sensor: 0,
        }
    }

    pub fn with_sensor(mut self, sensor: SensorId) -> Self {
        self.sensor = sensor;
        self
    }
}

// ---------------------------------------------------------------------------
// Baseline
// ---------------------------------------------------------------------------

/// The estimated "normal" PM2.5 level at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Switch state + control signals
// ---------------------------------------------------------------------------

/// Binary fan state.  The wire form is the literal token `ON` or `OFF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub const fn token(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }

    /// Decode a raw pub/sub payload.
    ///
    /// Only the two exact tokens are accepted; surrounding ASCII whitespace
    /// (a trailing newline from `mosquitto_pub`, say) is tolerated.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ParseRecordError> {
        let text = core::str::from_utf8(payload).map_err(|_| ParseRecordError::NotUtf8)?;
        text.trim_matches(|c: char| c.is_ascii_whitespace()).parse()
    }
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for SwitchState {
    type Err = ParseRecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON" => Ok(Self::On),
            "OFF" => Ok(Self::Off),
            _ => Err(ParseRecordError::UnknownToken),
        }
    }
}

/// One entry in a control log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub state: SwitchState,
}

impl Signal {
    pub fn new(timestamp: DateTime<Utc>, state: SwitchState) -> Self {
        Self { timestamp, state }
    }
}

/// The three append-only control logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalLog {
    /// Event detector output ("system wants the fan on").
    System,
    /// Operator / dashboard enable switch.
    User,
    /// Authoritative command the relay must track.
    Filter,
}

impl SignalLog {
    pub const ALL: [SignalLog; 3] = [Self::System, Self::User, Self::Filter];

    pub const fn name(self) -> &'static str {
        match self {
            Self::System => "system_control",
            Self::User => "user_control",
            Self::Filter => "filter_state",
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseRecordError {
    /// Payload bytes are not valid UTF-8.
    NotUtf8,
    /// Text is neither `ON` nor `OFF`.
    UnknownToken,
    /// Text is neither `indoor` nor `outdoor`.
    UnknownSource,
}

impl fmt::Display for ParseRecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotUtf8 => write!(f, "payload is not UTF-8"),
            Self::UnknownToken => write!(f, "expected ON or OFF"),
            Self::UnknownSource => write!(f, "expected indoor or outdoor"),
        }
    }
}

impl std::error::Error for ParseRecordError {}
