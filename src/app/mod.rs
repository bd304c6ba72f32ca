//! Application core: pure decision logic, zero I/O.
//!
//! This module contains the business rules for the filter controller:
//! cycle orchestration over the baseline estimator, event detector and
//! control combinator.  All interaction with storage and the broker happens
//! through **port traits** defined in [`ports`], keeping this layer fully
//! testable without a database or network.

pub mod events;
pub mod ports;
pub mod service;
