//! Unified error type for the airguard crate.
//!
//! Each port has its own error enum (see [`crate::app::ports`]); this type
//! lets the binary funnel all of them through a single `?` chain.  Inside
//! the control cycles errors are handled at the boundary and never abort
//! the process.

use core::fmt;

use crate::app::ports::StoreError;
use crate::config::ConfigError;
use crate::relay::RelayError;

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug)]
pub enum Error {
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
    /// The record store rejected a read or append.
    Store(StoreError),
    /// The relay output pin could not be driven.
    Relay(RelayError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Store(e) => write!(f, "store: {e}"),
            Self::Relay(e) => write!(f, "relay: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<RelayError> for Error {
    fn from(e: RelayError) -> Self {
        Self::Relay(e)
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
