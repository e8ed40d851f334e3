//! Unified error types for the control core.
//!
//! A single `Error` enum that every subsystem converts into, so the
//! control service handles failures uniformly.  All variants are `Copy`
//! so they can be returned from the per-cycle path without allocation.
//!
//! Cache misses are not errors: a missing gain recommendation is an
//! `Option::None` and the controller silently keeps its current gains.

use core::fmt;

pub use crate::app::ports::{ConfigError, StorageError};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the control core funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Error {
    /// The safety interlock is tripped.
    Safety(SafetyFault),
    /// A parameter was out of range or malformed.
    Config(ConfigError),
    /// The persistent store failed.
    Storage(StorageError),
    /// Relay-feedback identification did not produce usable gains.
    AutoTune(AutoTuneFailure),
    /// An actuator command failed.
    Actuator(ActuatorError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safety(e) => write!(f, "safety: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::AutoTune(e) => write!(f, "auto-tune: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Safety faults
// ---------------------------------------------------------------------------

/// Safety faults override the controller output unconditionally.  Once
/// raised the fault stays latched until an operator clears it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SafetyFault {
    /// The measurement crossed the safety limit on this cycle.
    LimitExceeded { measured: f32, limit: f32 },
    /// A previous trip is still latched.
    Latched,
}

impl fmt::Display for SafetyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitExceeded { measured, limit } => {
                write!(f, "measurement {measured:.2} beyond limit {limit:.2}")
            }
            Self::Latched => write!(f, "emergency stop latched"),
        }
    }
}

impl From<SafetyFault> for Error {
    fn from(e: SafetyFault) -> Self {
        Self::Safety(e)
    }
}

// ---------------------------------------------------------------------------
// Auto-tune failures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoTuneFailure {
    /// Relay amplitude was zero, negative or not finite.
    InvalidAmplitude,
    /// The measured oscillation was too small or had no period.
    InsufficientOscillation,
    /// No complete oscillation before the tuning deadline.
    Timeout,
    /// The tune was cancelled by an emergency stop.
    Aborted,
}

impl fmt::Display for AutoTuneFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAmplitude => write!(f, "invalid relay amplitude"),
            Self::InsufficientOscillation => write!(f, "insufficient oscillation"),
            Self::Timeout => write!(f, "timed out"),
            Self::Aborted => write!(f, "aborted by emergency stop"),
        }
    }
}

impl From<AutoTuneFailure> for Error {
    fn from(e: AutoTuneFailure) -> Self {
        Self::AutoTune(e)
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// GPIO set failed.
    GpioWriteFailed,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpioWriteFailed => write!(f, "GPIO write failed"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
