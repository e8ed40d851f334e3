//! Slow self-tuning from the controller's own error history.
//!
//! Runs at most once per interval.  A steady bias (large mean, small
//! variance) nudges `kp` up; oscillation (large variance) nudges `kd`
//! down.  Results are always clamped to the global bounds.

use log::info;

use super::gains::{GainBounds, Gains};

const BIAS_MEAN: f32 = 1.0;
const BIAS_MAX_VARIANCE: f32 = 0.5;
const OSCILLATION_VARIANCE: f32 = 2.0;
const KP_STEP: f32 = 1.05;
const KD_STEP: f32 = 0.95;

/// Mean and population variance of a sample window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorStats {
    pub mean: f32,
    pub variance: f32,
    pub mean_abs: f32,
    pub count: usize,
}

impl ErrorStats {
    /// `None` for an empty window.
    pub fn from_samples<'a>(samples: impl Iterator<Item = &'a f32> + Clone) -> Option<Self> {
        let (sum, abs_sum, count) = samples
            .clone()
            .fold((0.0f32, 0.0f32, 0usize), |(s, a, n), &v| (s + v, a + v.abs(), n + 1));
        if count == 0 {
            return None;
        }
        let mean = sum / count as f32;
        let variance = samples.map(|&v| (v - mean) * (v - mean)).sum::<f32>() / count as f32;
        Some(Self {
            mean,
            variance,
            mean_abs: abs_sum / count as f32,
            count,
        })
    }
}

pub struct GainAdapter {
    interval_ms: u64,
    last_run_ms: u64,
    runs: u32,
}

impl GainAdapter {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_run_ms: 0,
            runs: 0,
        }
    }

    pub fn due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_run_ms) >= self.interval_ms
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    /// Run one adaptation pass if the interval has elapsed.  Returns the
    /// new gains when they differ from `current`.
    pub fn adapt(
        &mut self,
        name: &str,
        current: Gains,
        stats: Option<ErrorStats>,
        bounds: &GainBounds,
        now_ms: u64,
    ) -> Option<Gains> {
        if !self.due(now_ms) {
            return None;
        }
        self.last_run_ms = now_ms;
        self.runs = self.runs.saturating_add(1);
        let stats = stats?;

        let mut next = current;
        if stats.mean.abs() > BIAS_MEAN && stats.variance < BIAS_MAX_VARIANCE {
            next.kp *= KP_STEP;
            info!("PID '{}': adapted Kp to {:.3} (steady error)", name, next.kp);
        }
        if stats.variance > OSCILLATION_VARIANCE {
            next.kd *= KD_STEP;
            info!("PID '{}': adapted Kd to {:.3} (oscillation)", name, next.kd);
        }

        let next = bounds.clamp(next);
        (next != current).then_some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(values: &[f32]) -> Option<ErrorStats> {
        ErrorStats::from_samples(values.iter())
    }

    #[test]
    fn stats_of_constant_window() {
        let s = stats(&[2.0; 10]).unwrap();
        assert!((s.mean - 2.0).abs() < 1e-6);
        assert!(s.variance.abs() < 1e-6);
        assert_eq!(s.count, 10);
    }

    #[test]
    fn empty_window_has_no_stats() {
        assert!(stats(&[]).is_none());
    }

    #[test]
    fn steady_bias_raises_kp() {
        let mut a = GainAdapter::new(60_000);
        let g = Gains::new(2.0, 0.5, 1.0);
        let next = a
            .adapt("t", g, stats(&[1.5; 50]), &GainBounds::default(), 60_000)
            .unwrap();
        assert!((next.kp - 2.1).abs() < 1e-5);
        assert_eq!(next.kd, 1.0);
    }

    #[test]
    fn oscillation_lowers_kd() {
        let mut a = GainAdapter::new(60_000);
        let g = Gains::new(2.0, 0.5, 1.0);
        let wave: Vec<f32> = (0..50).map(|i| if i % 2 == 0 { 3.0 } else { -3.0 }).collect();
        let next = a
            .adapt("t", g, stats(&wave), &GainBounds::default(), 60_000)
            .unwrap();
        assert!((next.kd - 0.95).abs() < 1e-5);
        assert_eq!(next.kp, 2.0);
    }

    #[test]
    fn throttled_between_runs() {
        let mut a = GainAdapter::new(60_000);
        let g = Gains::new(2.0, 0.5, 1.0);
        assert!(a.adapt("t", g, stats(&[1.5; 5]), &GainBounds::default(), 30_000).is_none());
        assert!(a.adapt("t", g, stats(&[1.5; 5]), &GainBounds::default(), 60_000).is_some());
        assert!(a.adapt("t", g, stats(&[1.5; 5]), &GainBounds::default(), 90_000).is_none());
    }

    #[test]
    fn clamped_at_upper_bound() {
        let mut a = GainAdapter::new(0);
        let g = Gains::new(20.0, 0.5, 1.0);
        assert!(a.adapt("t", g, stats(&[1.5; 5]), &GainBounds::default(), 1).is_none());
    }
}
