//! Inbound commands to the application service.
//!
//! These represent actions requested by the outside world (operator
//! console, telemetry uplink, scheduler) that the
//! [`ControlService`](super::service::ControlService) interprets and
//! acts upon.  Every command addresses one loop.

use crate::config::LoopId;
use crate::control::gains::Gains;

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppCommand {
    SetTarget { loop_id: LoopId, target: f32 },

    /// Replace the gains immediately (clamped, persisted).
    SetGains { loop_id: LoopId, gains: Gains },

    /// Move to new gains over `duration_ms`; `None` uses the loop's
    /// configured transition time.
    SetGainsSmooth {
        loop_id: LoopId,
        gains: Gains,
        duration_ms: Option<u32>,
    },

    /// Start relay-feedback identification with the given output amplitude (%).
    StartAutoTune { loop_id: LoopId, amplitude: f32 },

    StopAutoTune(LoopId),

    /// Release a latched safety interlock.
    ClearEmergencyStop(LoopId),

    SetAdaptation { loop_id: LoopId, enabled: bool },

    SetLearning { loop_id: LoopId, enabled: bool },

    /// Clear controller state (integral, history, filter).  Gains are kept.
    Reset(LoopId),
}

impl AppCommand {
    pub const fn loop_id(&self) -> LoopId {
        match *self {
            Self::SetTarget { loop_id, .. }
            | Self::SetGains { loop_id, .. }
            | Self::SetGainsSmooth { loop_id, .. }
            | Self::StartAutoTune { loop_id, .. }
            | Self::SetAdaptation { loop_id, .. }
            | Self::SetLearning { loop_id, .. } => loop_id,
            Self::StopAutoTune(loop_id) | Self::ClearEmergencyStop(loop_id) | Self::Reset(loop_id) => {
                loop_id
            }
        }
    }
}
