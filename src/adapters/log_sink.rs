//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (which goes to UART / USB-CDC in production).
//! Status snapshots are rendered as one JSON line so a serial capture can
//! be fed straight into a plotting tool.

use log::{error, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink {
    emitted: u32,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events logged so far.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        self.emitted = self.emitted.wrapping_add(1);
        match event {
            AppEvent::Status(s) => match serde_json::to_string(s) {
                Ok(json) => info!("STATUS | {}", json),
                Err(e) => warn!("STATUS | {} (encode failed: {})", s.name, e),
            },
            AppEvent::EmergencyStop {
                loop_id,
                measured,
                limit,
            } => {
                error!(
                    "ESTOP | {} measured={:.2} limit={:.2}",
                    loop_id.name(),
                    measured,
                    limit
                );
            }
            AppEvent::EmergencyCleared(loop_id) => {
                info!("ESTOP | {} cleared", loop_id.name());
            }
            AppEvent::GainsChanged {
                loop_id,
                gains,
                source,
            } => {
                info!(
                    "GAINS | {} Kp={:.3} Ki={:.3} Kd={:.3} ({:?})",
                    loop_id.name(),
                    gains.kp,
                    gains.ki,
                    gains.kd,
                    source
                );
            }
            AppEvent::AutoTuneComplete {
                loop_id,
                gains,
                ultimate_gain,
                ultimate_period_s,
            } => {
                info!(
                    "TUNE  | {} Ku={:.3} Tu={:.2}s -> Kp={:.3} Ki={:.3} Kd={:.3}",
                    loop_id.name(),
                    ultimate_gain,
                    ultimate_period_s,
                    gains.kp,
                    gains.ki,
                    gains.kd
                );
            }
            AppEvent::AutoTuneFailed { loop_id, reason } => {
                warn!("TUNE  | {} failed: {}", loop_id.name(), reason);
            }
            AppEvent::HealthDegraded { loop_id, metrics } => {
                warn!(
                    "HEALTH| {} degraded stuck={} high_error={} saturated={}",
                    loop_id.name(),
                    metrics.output_stuck,
                    metrics.persistent_high_error,
                    metrics.output_saturation
                );
            }
            AppEvent::HealthRecovered(loop_id) => {
                info!("HEALTH| {} recovered", loop_id.name());
            }
            AppEvent::PersistenceFailed { loop_id, error } => {
                warn!("STORE | {} gain save failed: {}", loop_id.name(), error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoopId;

    #[test]
    fn counts_emitted_events() {
        let mut sink = LogEventSink::new();
        sink.emit(&AppEvent::EmergencyCleared(LoopId::Heater));
        sink.emit(&AppEvent::HealthRecovered(LoopId::Co2));
        assert_eq!(sink.emitted(), 2);
    }
}
