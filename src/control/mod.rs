//! Control algorithms: the PID core and everything that tunes it.

pub mod adapter;
pub mod autotune;
pub mod feed_forward;
pub mod filter;
pub mod gains;
pub mod health;
pub mod pid;
pub mod profile;
pub mod transition;

pub use gains::{GainBounds, Gains};
pub use pid::PidController;
