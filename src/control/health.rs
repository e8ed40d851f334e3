//! Periodic diagnostics over the controller's output and error.
//!
//! | Flag                    | Raised when                                          |
//! |-------------------------|------------------------------------------------------|
//! | `output_stuck`          | |Δoutput| < 0.5 while |error| > 1.0, 3 checks in a row |
//! | `persistent_high_error` | |error| > 5.0 at the check                           |
//! | `output_saturation`     | within 1.0 of a bound for more than 10 checks        |
//!
//! The stuck counter resets on the first healthy check.  The saturation
//! counter decays by one per unsaturated check instead.

use core::fmt::Write;

use log::{info, warn};
use serde::Serialize;

const STUCK_OUTPUT_DELTA: f32 = 0.5;
const STUCK_ERROR: f32 = 1.0;
const STUCK_CHECKS: u32 = 3;
const HIGH_ERROR: f32 = 5.0;
const SATURATION_BAND: f32 = 1.0;
const SATURATION_CHECKS: u32 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HealthMetrics {
    pub output_stuck: bool,
    pub persistent_high_error: bool,
    pub output_saturation: bool,
    pub stuck_count: u32,
    pub saturation_count: u32,
    pub last_output: f32,
    pub last_check_ms: u64,
    pub has_error: bool,
}

/// Change in aggregate health produced by a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthChange {
    Degraded,
    Recovered,
}

pub struct HealthMonitor {
    metrics: HealthMetrics,
    interval_ms: u64,
    reasons: heapless::String<96>,
}

impl HealthMonitor {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            metrics: HealthMetrics::default(),
            interval_ms,
            reasons: heapless::String::new(),
        }
    }

    pub fn due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.metrics.last_check_ms) >= self.interval_ms
    }

    /// Run one diagnostic pass.
    pub fn check(
        &mut self,
        name: &str,
        output: f32,
        error: f32,
        output_min: f32,
        output_max: f32,
        now_ms: u64,
    ) -> Option<HealthChange> {
        let m = &mut self.metrics;
        let was_error = m.has_error;

        if (output - m.last_output).abs() < STUCK_OUTPUT_DELTA && error.abs() > STUCK_ERROR {
            m.stuck_count = m.stuck_count.saturating_add(1);
        } else {
            m.stuck_count = 0;
        }
        m.output_stuck = m.stuck_count >= STUCK_CHECKS;

        m.persistent_high_error = error.abs() > HIGH_ERROR;

        if output <= output_min + SATURATION_BAND || output >= output_max - SATURATION_BAND {
            m.saturation_count = m.saturation_count.saturating_add(1);
        } else {
            m.saturation_count = m.saturation_count.saturating_sub(1);
        }
        m.output_saturation = m.saturation_count > SATURATION_CHECKS;

        m.last_output = output;
        m.last_check_ms = now_ms;
        m.has_error = m.output_stuck || m.persistent_high_error || m.output_saturation;
        self.rebuild_reasons();

        match (was_error, self.metrics.has_error) {
            (false, true) => {
                warn!("PID '{}' health degraded: {}", name, self.reasons);
                Some(HealthChange::Degraded)
            }
            (true, false) => {
                info!("PID '{}' health recovered", name);
                Some(HealthChange::Recovered)
            }
            _ => None,
        }
    }

    fn rebuild_reasons(&mut self) {
        self.reasons.clear();
        let m = &self.metrics;
        let flags = [
            (m.output_stuck, "output stuck"),
            (m.persistent_high_error, "persistent high error"),
            (m.output_saturation, "output saturated"),
        ];
        for (raised, text) in flags {
            if raised {
                if !self.reasons.is_empty() {
                    let _ = self.reasons.push_str("; ");
                }
                let _ = write!(self.reasons, "{text}");
            }
        }
    }

    pub fn metrics(&self) -> HealthMetrics {
        self.metrics
    }

    pub fn has_error(&self) -> bool {
        self.metrics.has_error
    }

    /// Human-readable description of the raised flags (empty when healthy).
    pub fn reasons(&self) -> &str {
        &self.reasons
    }

    pub fn reset(&mut self) {
        self.metrics = HealthMetrics::default();
        self.reasons.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mon() -> HealthMonitor {
        HealthMonitor::new(10_000)
    }

    #[test]
    fn stuck_needs_three_consecutive_checks() {
        let mut h = mon();
        h.check("t", 40.0, 2.0, 0.0, 100.0, 0);
        h.check("t", 40.1, 2.0, 0.0, 100.0, 1);
        assert!(!h.metrics().output_stuck);
        h.check("t", 40.2, 2.0, 0.0, 100.0, 2);
        assert!(!h.metrics().output_stuck);
        assert_eq!(h.metrics().stuck_count, 2);
        h.check("t", 40.3, 2.0, 0.0, 100.0, 3);
        assert!(h.metrics().output_stuck);
        assert!(h.has_error());
        assert!(h.reasons().contains("output stuck"));
    }

    #[test]
    fn healthy_check_resets_stuck_counter() {
        let mut h = mon();
        h.check("t", 40.0, 2.0, 0.0, 100.0, 0);
        h.check("t", 40.0, 2.0, 0.0, 100.0, 1);
        h.check("t", 40.0, 0.2, 0.0, 100.0, 2);
        assert_eq!(h.metrics().stuck_count, 0);
    }

    #[test]
    fn high_error_flagged_immediately() {
        let mut h = mon();
        let change = h.check("t", 50.0, 6.0, 0.0, 100.0, 0);
        assert_eq!(change, Some(HealthChange::Degraded));
        assert!(h.metrics().persistent_high_error);
        let change = h.check("t", 30.0, 0.5, 0.0, 100.0, 1);
        assert_eq!(change, Some(HealthChange::Recovered));
        assert!(h.reasons().is_empty());
    }

    #[test]
    fn saturation_counts_and_decays() {
        let mut h = mon();
        for i in 0..11 {
            h.check("t", 100.0, 0.0, 0.0, 100.0, i);
        }
        assert!(h.metrics().output_saturation);
        h.check("t", 50.0, 0.0, 0.0, 100.0, 12);
        assert_eq!(h.metrics().saturation_count, 10);
        assert!(!h.metrics().output_saturation);
    }

    #[test]
    fn due_respects_interval() {
        let mut h = mon();
        h.check("t", 0.0, 0.0, 0.0, 100.0, 5_000);
        assert!(!h.due(10_000));
        assert!(h.due(15_000));
    }
}
