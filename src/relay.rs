//! Fan relay driver.
//!
//! Drives any `embedded_hal` [`OutputPin`] with set-state semantics: the
//! pin is written to the level for the commanded state, never toggled, and
//! a command equal to the last applied one does not touch the pin at all.
//! Duplicate deliveries are therefore harmless.

use core::fmt;

use embedded_hal::digital::OutputPin;
use log::{debug, info};

use crate::records::SwitchState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The GPIO write failed.
    Pin(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pin(msg) => write!(f, "relay pin write failed: {msg}"),
        }
    }
}

impl std::error::Error for RelayError {}

pub struct Relay<P: OutputPin> {
    pin: P,
    active_high: bool,
    applied: Option<SwitchState>,
}

impl<P: OutputPin> Relay<P> {
    /// Wrap `pin`.  The pin is not written until the first command.
    pub fn new(pin: P, active_high: bool) -> Self {
        Self {
            pin,
            active_high,
            applied: None,
        }
    }

    /// Drive the relay to `state`.
    ///
    /// Returns `Ok(true)` when the pin was written, `Ok(false)` when the
    /// relay already held that state.
    pub fn apply(&mut self, state: SwitchState) -> Result<bool, RelayError> {
        if self.applied == Some(state) {
            debug!("relay: already {}, no write", state);
            return Ok(false);
        }
        self.write(state)?;
        self.applied = Some(state);
        info!("relay: fan {}", state);
        Ok(true)
    }

    /// Rewrite the last applied level, e.g. after a reconnect or restart.
    /// No-op before the first command.
    pub fn reassert(&mut self) -> Result<(), RelayError> {
        match self.applied {
            Some(state) => {
                debug!("relay: reasserting {}", state);
                self.write(state)
            }
            None => Ok(()),
        }
    }

    /// Adopt a persisted state at startup and drive the pin to it.
    pub fn restore(&mut self, state: SwitchState) -> Result<(), RelayError> {
        self.write(state)?;
        self.applied = Some(state);
        info!("relay: restored fan {}", state);
        Ok(())
    }

    /// Last state written to the pin.
    pub fn applied(&self) -> Option<SwitchState> {
        self.applied
    }

    /// Borrow the underlying pin (tests inspect mock pins through this).
    pub fn pin(&self) -> &P {
        &self.pin
    }

    fn write(&mut self, state: SwitchState) -> Result<(), RelayError> {
        let high = state.is_on() == self.active_high;
        let res = if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        res.map_err(|e| RelayError::Pin(format!("{e:?}")))
    }
}
