//! TankCtl firmware library.
//!
//! Exposes the control core (PID, safety, tuning, learning) for
//! integration testing and host-side simulation.  All ESP-IDF-specific
//! code is guarded by `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod learning;
pub mod pins;
pub mod safety;

pub use error::Error;
