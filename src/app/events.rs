//! Outbound application events.
//!
//! Controllers queue these and the [`ControlService`](super::service::ControlService)
//! forwards them through the [`EventSink`](super::ports::EventSink) port.
//! Adapters on the other side decide what to do with them: log to
//! serial, publish to telemetry, update a display.

use serde::Serialize;

use crate::app::ports::StorageError;
use crate::config::LoopId;
use crate::control::feed_forward::FeedForwardTerms;
use crate::control::filter::FilterState;
use crate::control::gains::Gains;
use crate::control::health::HealthMetrics;
use crate::control::profile::ComputeProfile;
use crate::error::AutoTuneFailure;

/// What caused a gain change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GainSource {
    Manual,
    Transition,
    Adaptation,
    AutoTune,
    Learning,
}

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The safety interlock latched; output is forced to zero.
    EmergencyStop { loop_id: LoopId, measured: f32, limit: f32 },

    /// An operator cleared the interlock.
    EmergencyCleared(LoopId),

    GainsChanged { loop_id: LoopId, gains: Gains, source: GainSource },

    AutoTuneComplete {
        loop_id: LoopId,
        gains: Gains,
        ultimate_gain: f32,
        ultimate_period_s: f32,
    },

    AutoTuneFailed { loop_id: LoopId, reason: AutoTuneFailure },

    HealthDegraded { loop_id: LoopId, metrics: HealthMetrics },

    HealthRecovered(LoopId),

    /// A gain write failed; in-memory gains stay authoritative.
    PersistenceFailed { loop_id: LoopId, error: StorageError },

    /// Periodic status snapshot.
    Status(ControllerStatus),
}

/// A point-in-time controller snapshot for telemetry collaborators.
/// Values are in process units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub loop_id: LoopId,
    pub name: &'static str,
    pub gains: Gains,
    pub target: f32,
    pub effective_target: f32,
    pub last_input: f32,
    pub last_error: f32,
    pub last_output: f32,
    pub integral: f32,

    pub emergency_stop: bool,
    pub emergency_stop_ms: Option<u64>,

    pub settled: bool,
    pub settling_time_s: f32,
    /// Percent of target.
    pub max_overshoot: f32,
    pub steady_state_error: f32,
    pub control_actions: u32,

    pub health: HealthMetrics,

    pub ml_confidence: f32,
    pub cache_hit_rate: f32,

    pub in_transition: bool,
    pub auto_tuning: bool,
    pub filter: Option<FilterState>,
    pub feed_forward: FeedForwardTerms,
    pub profile: ComputeProfile,

    /// Relay state, filled in by the service.
    pub relay_on: bool,
    pub duty: f32,
}
