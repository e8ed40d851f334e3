//! Relay-feedback auto-tuning (Åström–Hägglund) with Ziegler–Nichols rules.
//!
//! While active the controller output is a bang-bang relay: `amplitude`
//! when the error is positive, zero otherwise.  The loop settles into a
//! limit cycle whose amplitude and period identify the ultimate gain
//! `Ku = 4d / (πa)` and ultimate period `Tu`.
//!
//! The detector watches the error for turning points.  A maximum followed
//! by a minimum and the next maximum gives one measurement: the period is
//! the time between maxima and the amplitude is half the peak-to-peak
//! swing.  Three measurements are averaged before the gains are derived.

use log::{info, warn};

use super::gains::Gains;
use crate::error::AutoTuneFailure;

/// Complete measurements required before tuning finishes.
pub const REQUIRED_MEASUREMENTS: u8 = 3;

/// Derived ultimate parameters and gains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZieglerNichols {
    pub ultimate_gain: f32,
    pub ultimate_period_s: f32,
    pub gains: Gains,
}

/// Classic Ziegler–Nichols PID rules from a relay experiment.
///
/// `oscillation_period_ms` is the time between successive maxima.
pub fn ziegler_nichols(
    relay_amplitude: f32,
    oscillation_amplitude: f32,
    oscillation_period_ms: u32,
) -> Result<ZieglerNichols, AutoTuneFailure> {
    if !relay_amplitude.is_finite() || relay_amplitude <= 0.0 {
        return Err(AutoTuneFailure::InvalidAmplitude);
    }
    if !oscillation_amplitude.is_finite()
        || oscillation_amplitude <= f32::EPSILON
        || oscillation_period_ms == 0
    {
        return Err(AutoTuneFailure::InsufficientOscillation);
    }

    let ku = 4.0 * relay_amplitude / (core::f32::consts::PI * oscillation_amplitude);
    let tu = oscillation_period_ms as f32 / 1000.0;

    Ok(ZieglerNichols {
        ultimate_gain: ku,
        ultimate_period_s: tu,
        gains: Gains {
            kp: 0.6 * ku,
            ki: 1.2 * ku / tu,
            kd: 0.075 * ku * tu,
        },
    })
}

/// Outcome of feeding one error sample to the tuner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutoTuneStatus {
    Idle,
    Running,
    Complete(ZieglerNichols),
    Failed(AutoTuneFailure),
}

pub struct AutoTuner {
    active: bool,
    amplitude: f32,
    started_ms: u64,
    timeout_ms: u64,

    last_error: Option<f32>,
    rising: bool,
    falling: bool,
    last_max_ms: Option<u64>,
    last_min: Option<f32>,

    measurements: u8,
    amplitude_sum: f32,
    period_sum_ms: u64,
}

impl AutoTuner {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            active: false,
            amplitude: 0.0,
            started_ms: 0,
            timeout_ms,
            last_error: None,
            rising: false,
            falling: false,
            last_max_ms: None,
            last_min: None,
            measurements: 0,
            amplitude_sum: 0.0,
            period_sum_ms: 0,
        }
    }

    pub fn start(&mut self, amplitude: f32, now_ms: u64) -> Result<(), AutoTuneFailure> {
        if !amplitude.is_finite() || amplitude <= 0.0 {
            return Err(AutoTuneFailure::InvalidAmplitude);
        }
        let timeout_ms = self.timeout_ms;
        *self = Self::new(timeout_ms);
        self.active = true;
        self.amplitude = amplitude;
        self.started_ms = now_ms;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    pub fn measurements(&self) -> u8 {
        self.measurements
    }

    /// Relay output for the current error.
    pub fn output(&self, error: f32) -> f32 {
        if error > 0.0 { self.amplitude } else { 0.0 }
    }

    /// Feed one error sample.  Completion and failure both deactivate
    /// the tuner.
    pub fn observe(&mut self, error: f32, now_ms: u64) -> AutoTuneStatus {
        if !self.active {
            return AutoTuneStatus::Idle;
        }
        if now_ms.saturating_sub(self.started_ms) >= self.timeout_ms {
            self.active = false;
            warn!(
                "Auto-tune timed out after {} ms ({} measurements)",
                self.timeout_ms, self.measurements
            );
            return AutoTuneStatus::Failed(AutoTuneFailure::Timeout);
        }

        let Some(prev) = self.last_error.replace(error) else {
            return AutoTuneStatus::Running;
        };

        if error > prev {
            if self.falling {
                self.last_min = Some(prev);
                self.falling = false;
            }
            self.rising = true;
        } else if error < prev {
            if self.rising {
                self.rising = false;
                if let Some(status) = self.on_maximum(prev, now_ms) {
                    return status;
                }
            }
            self.falling = true;
        }
        AutoTuneStatus::Running
    }

    fn on_maximum(&mut self, peak: f32, now_ms: u64) -> Option<AutoTuneStatus> {
        let previous = self.last_max_ms.replace(now_ms);
        let (Some(prev_ms), Some(trough)) = (previous, self.last_min.take()) else {
            return None;
        };

        let amplitude = (peak - trough) / 2.0;
        let period = now_ms.saturating_sub(prev_ms);
        if amplitude <= 0.0 || period == 0 {
            return None;
        }
        self.measurements += 1;
        self.amplitude_sum += amplitude;
        self.period_sum_ms += period;

        if self.measurements < REQUIRED_MEASUREMENTS {
            return None;
        }

        self.active = false;
        let n = f32::from(self.measurements);
        let mean_amplitude = self.amplitude_sum / n;
        let mean_period = (self.period_sum_ms / u64::from(self.measurements)) as u32;
        Some(match ziegler_nichols(self.amplitude, mean_amplitude, mean_period) {
            Ok(zn) => {
                info!(
                    "Auto-tune complete: Ku={:.3}, Tu={:.3}s -> Kp={:.3} Ki={:.3} Kd={:.3}",
                    zn.ultimate_gain, zn.ultimate_period_s, zn.gains.kp, zn.gains.ki, zn.gains.kd
                );
                AutoTuneStatus::Complete(zn)
            }
            Err(e) => {
                warn!("Auto-tune failed: {}", e);
                AutoTuneStatus::Failed(e)
            }
        })
    }
}
