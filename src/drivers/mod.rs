//! Actuator drivers and platform helpers.

pub mod relay;
pub mod task_pin;
pub mod watchdog;
