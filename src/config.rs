//! System configuration parameters
//!
//! All tunable parameters for the heater and CO2 control loops.
//! Values can be overridden via NVS (non-volatile storage).

use serde::{Deserialize, Serialize};

use crate::control::feed_forward::FeedForwardConfig;
use crate::control::gains::{GainBounds, Gains};
use crate::learning::context::{BucketWidths, Hemisphere};

/// Which control loop a command, event or record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopId {
    Heater,
    Co2,
}

impl LoopId {
    pub const ALL: [Self; 2] = [Self::Heater, Self::Co2];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Heater => "Heater",
            Self::Co2 => "CO2",
        }
    }

    /// NVS namespace for the loop's gains.
    pub const fn namespace(self) -> &'static str {
        match self {
            Self::Heater => "heater_pid",
            Self::Co2 => "co2_pid",
        }
    }

    /// NVS namespace for the loop's lookup table.
    pub const fn ml_namespace(self) -> &'static str {
        match self {
            Self::Heater => "heater_ml",
            Self::Co2 => "co2_ml",
        }
    }
}

/// Direct: output rises when the measurement is below target (heater).
/// Reverse: output rises when the measurement is above target (CO2 dosing
/// lowers pH).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlAction {
    #[default]
    Direct,
    Reverse,
}

impl ControlAction {
    /// Sign that maps measurement space into control space.
    pub const fn sign(self) -> f32 {
        match self {
            Self::Direct => 1.0,
            Self::Reverse => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub enabled: bool,
    pub process_noise: f32,
    pub measurement_noise: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            process_noise: 0.001,
            measurement_noise: 0.1,
        }
    }
}

/// Per-loop controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    // --- Gains & target ---
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub target: f32,
    pub action: ControlAction,

    // --- Output ---
    /// Output range in percent.
    pub output_min: f32,
    pub output_max: f32,

    // --- Safety ---
    /// Measurement may exceed the target by this much before the loop latches off.
    pub safety_margin: f32,

    // --- Integral ---
    pub anti_windup: bool,
    pub integral_max: f32,

    // --- Setpoint ramp ---
    pub ramp_enabled: bool,
    /// Units per second.
    pub ramp_rate: f32,

    // --- Derivative ---
    pub derivative_filter_enabled: bool,
    /// Weight of the newest derivative sample in the low-pass filter
    /// (1 = unfiltered, smaller = smoother).
    pub derivative_filter: f32,

    // --- Input filter / feed-forward ---
    pub filter: FilterConfig,
    pub feed_forward: FeedForwardConfig,

    /// Lookup-table bucket widths in this loop's process units.
    pub buckets: BucketWidths,

    // --- Supervision ---
    pub adaptation_enabled: bool,
    pub adaptation_interval_ms: u64,
    pub health_enabled: bool,
    pub health_interval_ms: u64,
    pub autotune_timeout_ms: u64,
    /// Default duration of smooth gain transitions.
    pub transition_ms: u32,
    /// Back-off between failed gain writes.
    pub persist_retry_ms: u64,
}

impl LoopConfig {
    pub const fn heater() -> Self {
        Self {
            kp: 2.0,
            ki: 0.5,
            kd: 1.0,
            target: 25.0,
            action: ControlAction::Direct,
            output_min: 0.0,
            output_max: 100.0,
            safety_margin: 5.0,
            anti_windup: true,
            integral_max: 50.0,
            ramp_enabled: true,
            ramp_rate: 0.5,
            derivative_filter_enabled: true,
            derivative_filter: 0.7,
            filter: FilterConfig {
                enabled: true,
                process_noise: 0.001,
                measurement_noise: 0.1,
            },
            feed_forward: FeedForwardConfig::heater(),
            buckets: BucketWidths::heater(),
            adaptation_enabled: true,
            adaptation_interval_ms: 60_000,
            health_enabled: true,
            health_interval_ms: 10_000,
            autotune_timeout_ms: 30 * 60 * 1000,
            transition_ms: 30_000,
            persist_retry_ms: 60_000,
        }
    }

    pub const fn co2() -> Self {
        Self {
            target: 6.8,
            action: ControlAction::Reverse,
            safety_margin: 0.8,
            integral_max: 30.0,
            ramp_rate: 0.1,
            derivative_filter: 0.8,
            feed_forward: FeedForwardConfig::disabled(),
            buckets: BucketWidths::co2(),
            ..Self::heater()
        }
    }

    pub const fn gains(&self) -> Gains {
        Gains::new(self.kp, self.ki, self.kd)
    }
}

/// How a relay turns a duty cycle into on/off switching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayMode {
    #[default]
    TimeProportional,
    /// On above 50 % duty, off otherwise.
    Threshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub mode: RelayMode,
    pub window_ms: u32,
    pub min_on_ms: u32,
    pub min_off_ms: u32,
    /// Minimum time between any two switching events.
    pub min_toggle_ms: u32,
    /// Drive the pin low for "on".
    pub inverted: bool,
}

impl RelayConfig {
    pub const fn heater() -> Self {
        Self {
            mode: RelayMode::TimeProportional,
            window_ms: 15_000,
            min_on_ms: 2_000,
            min_off_ms: 2_000,
            min_toggle_ms: 5_000,
            inverted: false,
        }
    }

    pub const fn co2() -> Self {
        Self {
            window_ms: 10_000,
            ..Self::heater()
        }
    }
}

/// Confidence gating for lookup recommendations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendPolicy {
    /// Above this, blend unconditionally.
    pub high_confidence: f32,
    /// Above this, blend only when recent error is poor.
    pub low_confidence: f32,
    /// Mean |error| that counts as poor performance.
    pub poor_performance_error: f32,
    pub high_blend: f32,
    pub low_blend: f32,
}

impl Default for BlendPolicy {
    fn default() -> Self {
        Self {
            high_confidence: 0.7,
            low_confidence: 0.5,
            poor_performance_error: 2.0,
            high_blend: 0.7,
            low_blend: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearningConfig {
    pub enabled: bool,
    /// Minimum spacing of lookup requests per loop.
    pub query_interval_ms: u64,
    pub cache_validity_ms: u64,
    /// Length of one performance window.
    pub performance_window_ms: u64,
    /// Worker flushes a dirty table at least this often.
    pub flush_interval_ms: u64,
    pub blend: BlendPolicy,
    pub hemisphere: Hemisphere,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            query_interval_ms: 60_000,
            cache_validity_ms: 300_000,
            performance_window_ms: 300_000,
            flush_interval_ms: 600_000,
            blend: BlendPolicy::default(),
            hemisphere: Hemisphere::Northern,
        }
    }
}

/// Core system configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub heater: LoopConfig,
    pub co2: LoopConfig,
    pub heater_relay: RelayConfig,
    pub co2_relay: RelayConfig,
    pub learning: LearningConfig,
    pub gain_bounds: GainBounds,

    // --- Timing ---
    /// Control loop interval (milliseconds)
    pub control_loop_interval_ms: u32,
    /// Status event interval (milliseconds)
    pub status_interval_ms: u32,
}

impl SystemConfig {
    pub const fn loop_config(&self, id: LoopId) -> &LoopConfig {
        match id {
            LoopId::Heater => &self.heater,
            LoopId::Co2 => &self.co2,
        }
    }

    pub const fn relay_config(&self, id: LoopId) -> &RelayConfig {
        match id {
            LoopId::Heater => &self.heater_relay,
            LoopId::Co2 => &self.co2_relay,
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            heater: LoopConfig::heater(),
            co2: LoopConfig::co2(),
            heater_relay: RelayConfig::heater(),
            co2_relay: RelayConfig::co2(),
            learning: LearningConfig::default(),
            gain_bounds: GainBounds::default(),
            control_loop_interval_ms: 1000, // 1 Hz
            status_interval_ms: 30_000,
        }
    }
}
