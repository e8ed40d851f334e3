//! Application core: control orchestration, zero direct I/O.
//!
//! This module wires the two control loops (heater and CO2) to their
//! relays, the adaptation workers, and the outside world.  All
//! interaction with storage, readings, and logging happens through
//! **port traits** defined in [`ports`], keeping this layer fully
//! testable without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
