//! Execution-time profile of the control computation.
//!
//! The controller times each `compute_with` call and feeds the duration
//! here together with the cycle period.  A call that takes longer than
//! its period counts as an overrun (missed deadline).

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComputeProfile {
    pub last_us: u32,
    pub min_us: u32,
    pub max_us: u32,
    /// Running mean over all recorded calls.
    pub avg_us: u32,
    pub count: u32,
    pub overruns: u32,
    /// Mean compute time as a share of the cycle period.
    pub cpu_usage_percent: f32,
}

impl Default for ComputeProfile {
    fn default() -> Self {
        Self {
            last_us: 0,
            min_us: u32::MAX,
            max_us: 0,
            avg_us: 0,
            count: 0,
            overruns: 0,
            cpu_usage_percent: 0.0,
        }
    }
}

impl ComputeProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call.  `period_us == 0` skips the deadline check.
    pub fn record(&mut self, elapsed_us: u32, period_us: u32) {
        self.last_us = elapsed_us;
        self.min_us = self.min_us.min(elapsed_us);
        self.max_us = self.max_us.max(elapsed_us);
        self.count = self.count.saturating_add(1);

        let n = u64::from(self.count);
        let avg = (u64::from(self.avg_us) * (n - 1) + u64::from(elapsed_us)) / n;
        self.avg_us = avg as u32;

        if period_us > 0 {
            if elapsed_us > period_us {
                self.overruns = self.overruns.saturating_add(1);
            }
            self.cpu_usage_percent = self.avg_us as f32 / period_us as f32 * 100.0;
        }
    }

    /// Smallest recorded time, or 0 before the first call.
    pub fn min_us(&self) -> u32 {
        if self.count == 0 { 0 } else { self.min_us }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_min_max_and_mean() {
        let mut p = ComputeProfile::new();
        assert_eq!(p.min_us(), 0);
        p.record(100, 1_000_000);
        p.record(300, 1_000_000);
        p.record(200, 1_000_000);
        assert_eq!(p.count, 3);
        assert_eq!(p.min_us(), 100);
        assert_eq!(p.max_us, 300);
        assert_eq!(p.avg_us, 200);
        assert_eq!(p.last_us, 200);
        assert_eq!(p.overruns, 0);
        assert!((p.cpu_usage_percent - 0.02).abs() < 1e-6);
    }

    #[test]
    fn counts_missed_deadlines() {
        let mut p = ComputeProfile::new();
        p.record(900, 1_000);
        p.record(1_200, 1_000);
        p.record(1_000, 1_000);
        assert_eq!(p.overruns, 1);
        // No period: timing still recorded, deadline not checked.
        p.record(5_000, 0);
        assert_eq!(p.overruns, 1);
        assert_eq!(p.count, 4);
    }
}
