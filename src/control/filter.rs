//! Single-variable Kalman filter for smoothing noisy measurements.
//!
//! Random-walk model: the state is expected to drift by `process_noise`
//! per update and each reading carries `measurement_noise` variance.
//! The first reading seeds the estimate directly.

use serde::Serialize;

/// Snapshot of the filter for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FilterState {
    pub estimate: f32,
    pub covariance: f32,
    pub initialized: bool,
}

pub struct InputFilter {
    estimate: f32,
    covariance: f32,
    process_noise: f32,
    measurement_noise: f32,
    initialized: bool,
}

impl InputFilter {
    pub fn new(process_noise: f32, measurement_noise: f32) -> Self {
        Self {
            estimate: 0.0,
            covariance: 1.0,
            process_noise: process_noise.max(0.0),
            measurement_noise: measurement_noise.max(f32::EPSILON),
            initialized: false,
        }
    }

    /// Fold one reading into the estimate and return the filtered value.
    /// Non-finite readings leave the estimate untouched.
    pub fn update(&mut self, measurement: f32) -> f32 {
        if !measurement.is_finite() {
            return self.estimate;
        }
        if !self.initialized {
            self.estimate = measurement;
            self.covariance = 1.0;
            self.initialized = true;
            return measurement;
        }

        // Predict
        self.covariance += self.process_noise;

        // Correct
        let gain = self.covariance / (self.covariance + self.measurement_noise);
        self.estimate += gain * (measurement - self.estimate);
        self.covariance *= 1.0 - gain;
        self.estimate
    }

    pub fn reset(&mut self) {
        self.estimate = 0.0;
        self.covariance = 1.0;
        self.initialized = false;
    }

    pub fn state(&self) -> FilterState {
        FilterState {
            estimate: self.estimate,
            covariance: self.covariance,
            initialized: self.initialized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reading_seeds_estimate() {
        let mut f = InputFilter::new(0.001, 0.1);
        assert_eq!(f.update(25.0), 25.0);
        assert!(f.state().initialized);
    }

    #[test]
    fn smooths_alternating_noise() {
        let mut f = InputFilter::new(0.001, 0.1);
        f.update(25.0);
        let mut last = 0.0;
        for i in 0..200 {
            let noisy = if i % 2 == 0 { 25.5 } else { 24.5 };
            last = f.update(noisy);
        }
        assert!((last - 25.0).abs() < 0.2, "estimate {last}");
    }

    #[test]
    fn tracks_a_step() {
        let mut f = InputFilter::new(0.01, 0.1);
        f.update(20.0);
        let mut last = 0.0;
        for _ in 0..500 {
            last = f.update(26.0);
        }
        assert!((last - 26.0).abs() < 0.05);
    }

    #[test]
    fn ignores_nan() {
        let mut f = InputFilter::new(0.001, 0.1);
        f.update(24.0);
        assert_eq!(f.update(f32::NAN), 24.0);
    }

    #[test]
    fn covariance_shrinks() {
        let mut f = InputFilter::new(0.001, 0.1);
        f.update(24.0);
        for _ in 0..50 {
            f.update(24.0);
        }
        assert!(f.state().covariance < 0.1);
    }
}
