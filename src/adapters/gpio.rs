//! Linux sysfs GPIO output pin.
//!
//! Implements the `embedded_hal` [`OutputPin`] trait over
//! `/sys/class/gpio`, so the relay driver runs unchanged on a Raspberry Pi
//! and against mock pins in tests.  The pin is exported and configured as
//! an output on open; it is deliberately left exported on drop so the relay
//! keeps its level across process restarts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use embedded_hal::digital::{self, ErrorKind, ErrorType, OutputPin};
use log::{debug, info};

const SYSFS_GPIO: &str = "/sys/class/gpio";

#[derive(Debug)]
pub struct GpioError(pub io::Error);

impl core::fmt::Display for GpioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "gpio: {}", self.0)
    }
}

impl std::error::Error for GpioError {}

impl digital::Error for GpioError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

pub struct SysfsPin {
    number: u32,
    value_path: PathBuf,
}

impl SysfsPin {
    /// Export BCM pin `number` and configure it as an output.
    ///
    /// `direction` is only written when the pin is not already an output,
    /// since writing `out` resets the level to low.
    pub fn open(number: u32) -> Result<Self, GpioError> {
        Self::open_at(Path::new(SYSFS_GPIO), number)
    }

    fn open_at(root: &Path, number: u32) -> Result<Self, GpioError> {
        let pin_dir = root.join(format!("gpio{number}"));
        if !pin_dir.exists() {
            fs::write(root.join("export"), number.to_string()).map_err(GpioError)?;
            debug!("gpio{}: exported", number);
        }

        let direction = pin_dir.join("direction");
        let current = fs::read_to_string(&direction).map_err(GpioError)?;
        if current.trim() != "out" {
            fs::write(&direction, "out").map_err(GpioError)?;
        }

        info!("gpio{}: ready as output", number);
        Ok(Self {
            number,
            value_path: pin_dir.join("value"),
        })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    fn write_level(&mut self, high: bool) -> Result<(), GpioError> {
        fs::write(&self.value_path, if high { "1" } else { "0" }).map_err(GpioError)
    }
}

impl ErrorType for SysfsPin {
    type Error = GpioError;
}

impl OutputPin for SysfsPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write_level(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write_level(true)
    }
}
