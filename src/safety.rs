//! Safety interlock.
//!
//! The guard runs **every cycle before any control math** and compares
//! the raw measurement against `target + margin`.  Values are in control
//! space, so a reverse-acting loop (CO2 lowering pH) passes negated
//! values and the same comparison trips on "too low".
//!
//! ## Trip lifecycle
//!
//! 1. The measurement crosses the limit.
//! 2. The guard latches and records the trip time.
//! 3. Every following check fails with [`SafetyFault::Latched`] even if
//!    the measurement has recovered.  There is no debounce.
//! 4. An operator calls [`SafetyGuard::clear`]; the caller resets its
//!    integral so the loop restarts from a clean state.

use log::{error, info};

use crate::error::SafetyFault;

pub struct SafetyGuard {
    margin: f32,
    tripped: bool,
    tripped_at_ms: Option<u64>,
    trip_count: u32,
}

impl SafetyGuard {
    pub fn new(margin: f32) -> Self {
        Self {
            margin: sanitize_margin(margin),
            tripped: false,
            tripped_at_ms: None,
            trip_count: 0,
        }
    }

    /// Highest permitted measurement for `target`.
    pub fn limit(&self, target: f32) -> f32 {
        target + self.margin
    }

    pub fn set_margin(&mut self, margin: f32) {
        self.margin = sanitize_margin(margin);
    }

    pub fn margin(&self) -> f32 {
        self.margin
    }

    /// Evaluate one measurement.  `Ok` means output may be computed.
    pub fn check(
        &mut self,
        name: &str,
        measurement: f32,
        target: f32,
        now_ms: u64,
    ) -> Result<(), SafetyFault> {
        let limit = self.limit(target);
        if measurement > limit {
            if !self.tripped {
                self.tripped = true;
                self.tripped_at_ms = Some(now_ms);
                self.trip_count = self.trip_count.saturating_add(1);
                error!(
                    "EMERGENCY STOP: '{}' measurement {:.2} beyond limit {:.2}",
                    name, measurement, limit
                );
            }
            return Err(SafetyFault::LimitExceeded { measured: measurement, limit });
        }
        if self.tripped {
            return Err(SafetyFault::Latched);
        }
        Ok(())
    }

    /// Release the latch.  Returns `true` if a trip was actually cleared.
    pub fn clear(&mut self, name: &str) -> bool {
        if !self.tripped {
            return false;
        }
        self.tripped = false;
        self.tripped_at_ms = None;
        info!("EMERGENCY STOP CLEARED: '{}'", name);
        true
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn tripped_at_ms(&self) -> Option<u64> {
        self.tripped_at_ms
    }

    pub fn trip_count(&self) -> u32 {
        self.trip_count
    }
}

fn sanitize_margin(margin: f32) -> f32 {
    if margin.is_finite() { margin.abs() } else { 0.0 }
}
