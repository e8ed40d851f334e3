//! Feed-forward from auxiliary readings.
//!
//! Each channel contributes `influence * (baseline - reading)`.  A cold
//! room (ambient below baseline) therefore pushes the heater output up
//! before the tank temperature has moved.  Missing readings contribute
//! nothing.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedForwardConfig {
    pub enabled: bool,
    /// Output % per °C of ambient deviation.
    pub ambient_influence: f32,
    pub ambient_baseline: f32,
    /// Output % per ppm of TDS deviation.
    pub tds_influence: f32,
    pub tds_baseline: f32,
    /// Output % per pH unit of deviation.
    pub ph_influence: f32,
    pub ph_baseline: f32,
}

impl FeedForwardConfig {
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            ambient_influence: 0.0,
            ambient_baseline: 22.0,
            tds_influence: 0.0,
            tds_baseline: 250.0,
            ph_influence: 0.0,
            ph_baseline: 7.0,
        }
    }

    pub const fn heater() -> Self {
        Self {
            enabled: true,
            ambient_influence: 0.3,
            tds_influence: 0.01,
            ..Self::disabled()
        }
    }
}

/// Per-channel contributions from the latest computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FeedForwardTerms {
    pub ambient: f32,
    pub tds: f32,
    pub ph: f32,
    pub total: f32,
}

pub struct FeedForward {
    cfg: FeedForwardConfig,
    last: FeedForwardTerms,
}

impl FeedForward {
    pub fn new(cfg: FeedForwardConfig) -> Self {
        Self {
            cfg,
            last: FeedForwardTerms::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cfg.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.cfg.enabled = enabled;
        if !enabled {
            self.last = FeedForwardTerms::default();
        }
    }

    pub fn compute(&mut self, ambient: Option<f32>, tds: Option<f32>, ph: Option<f32>) -> f32 {
        if !self.cfg.enabled {
            return 0.0;
        }
        let c = &self.cfg;
        let ambient = channel(c.ambient_influence, c.ambient_baseline, ambient);
        let tds = channel(c.tds_influence, c.tds_baseline, tds);
        let ph = channel(c.ph_influence, c.ph_baseline, ph);
        self.last = FeedForwardTerms {
            ambient,
            tds,
            ph,
            total: ambient + tds + ph,
        };
        self.last.total
    }

    pub fn last_terms(&self) -> FeedForwardTerms {
        self.last
    }
}

fn channel(influence: f32, baseline: f32, reading: Option<f32>) -> f32 {
    match reading {
        Some(v) if v.is_finite() => influence * (baseline - v),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_contributes_nothing() {
        let mut ff = FeedForward::new(FeedForwardConfig::disabled());
        assert_eq!(ff.compute(Some(10.0), Some(500.0), Some(6.0)), 0.0);
    }

    #[test]
    fn cold_room_adds_heat() {
        let mut ff = FeedForward::new(FeedForwardConfig::heater());
        let total = ff.compute(Some(18.0), None, None);
        assert!((total - 1.2).abs() < 1e-5);
        assert!((ff.last_terms().ambient - 1.2).abs() < 1e-5);
        assert_eq!(ff.last_terms().tds, 0.0);
    }

    #[test]
    fn baseline_readings_cancel() {
        let mut ff = FeedForward::new(FeedForwardConfig::heater());
        assert_eq!(ff.compute(Some(22.0), Some(250.0), Some(7.0)), 0.0);
    }

    #[test]
    fn channels_sum() {
        let cfg = FeedForwardConfig {
            ph_influence: 0.2,
            ..FeedForwardConfig::heater()
        };
        let mut ff = FeedForward::new(cfg);
        let total = ff.compute(Some(20.0), Some(150.0), Some(6.0));
        let t = ff.last_terms();
        assert!((t.ambient - 0.6).abs() < 1e-5);
        assert!((t.tds - 1.0).abs() < 1e-5);
        assert!((t.ph - 0.2).abs() < 1e-5);
        assert!((total - 1.8).abs() < 1e-5);
    }
}
