//! Airguard filter control library.
//!
//! Exposes the decision engine (baseline estimator, event detector,
//! control combinator), the relay delivery loop, and the adapters that
//! connect them to SQLite, MQTT and GPIO.  The `airguard` binary wires
//! these together; tests drive them directly.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod baseline;
pub mod combinator;
pub mod config;
pub mod delivery;
pub mod detector;
pub mod error;
pub mod fsm;
pub mod records;
pub mod relay;

pub use error::{Error, Result};
