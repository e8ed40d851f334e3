//! PID gain sets and the global safe bounds every mutation is clamped to.

use serde::{Deserialize, Serialize};

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl Gains {
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }

    /// Linear interpolation toward `to`; `t` is clamped to `[0, 1]`.
    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 1.0 };
        Self {
            kp: self.kp + (to.kp - self.kp) * t,
            ki: self.ki + (to.ki - self.ki) * t,
            kd: self.kd + (to.kd - self.kd) * t,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.kp.is_finite() && self.ki.is_finite() && self.kd.is_finite()
    }
}

/// Global safe range for each gain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainBounds {
    pub kp_min: f32,
    pub kp_max: f32,
    pub ki_min: f32,
    pub ki_max: f32,
    pub kd_min: f32,
    pub kd_max: f32,
}

impl Default for GainBounds {
    fn default() -> Self {
        Self {
            kp_min: 0.1,
            kp_max: 20.0,
            ki_min: 0.01,
            ki_max: 5.0,
            kd_min: 0.01,
            kd_max: 10.0,
        }
    }
}

impl GainBounds {
    /// Clamp every gain into range.  A non-finite gain falls to its minimum.
    pub fn clamp(&self, g: Gains) -> Gains {
        Gains {
            kp: clamp_finite(g.kp, self.kp_min, self.kp_max),
            ki: clamp_finite(g.ki, self.ki_min, self.ki_max),
            kd: clamp_finite(g.kd, self.kd_min, self.kd_max),
        }
    }

    pub fn contains(&self, g: &Gains) -> bool {
        self.clamp(*g) == *g
    }
}

fn clamp_finite(v: f32, min: f32, max: f32) -> f32 {
    if v.is_nan() { min } else { v.clamp(min, max) }
}
