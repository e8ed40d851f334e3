//! Application service: the hexagonal core.
//!
//! [`ControlService`] owns both control loops (heater and CO2), each a
//! PID controller driving a relay.  It exposes a clean,
//! hardware-agnostic API.  All I/O flows through port traits and the
//! `embedded-hal` pin abstraction, making the whole service testable
//! with mock adapters.
//!
//! ```text
//!  SensorFrame ──▶ ┌──────────────────────────┐ ──▶ EventSink
//!                  │      ControlService       │
//!  StoragePort ◀──▶│  PID ×2 · Relay ×2        │ ──▶ relay pins
//!                  └────────────┬─────────────┘
//!                               │ AdaptationLink (non-blocking)
//!                               ▼
//!                        adaptation worker
//! ```
//!
//! [`ControlService::tick`] is invoked by an external scheduler at the
//! configured control period.  Per loop it:
//!
//! 1. picks up a worker result if one is ready,
//! 2. runs the controller (or forces zero output when the reading is missing),
//! 3. drives the relay, or holds it off while the interlock is latched,
//! 4. forwards lookup requests and performance samples to the worker,
//! 5. persists dirty gains and forwards queued events.

use embedded_hal::digital::OutputPin;
use log::{info, warn};

use crate::config::{LoopId, SystemConfig};
use crate::control::pid::PidController;
use crate::drivers::relay::RelayActuator;
use crate::error::Error;
use crate::learning::context::{CycleContext, SensorFrame};
use crate::learning::worker::AdaptationLink;

use super::commands::AppCommand;
use super::events::{AppEvent, ControllerStatus};
use super::ports::{EventSink, StoragePort};

// ───────────────────────────────────────────────────────────────
// ControlLoop
// ───────────────────────────────────────────────────────────────

/// One controller, its relay, and its link to the adaptation worker.
pub struct ControlLoop<'l, P: OutputPin> {
    pid: PidController,
    relay: RelayActuator<P>,
    link: Option<&'l AdaptationLink>,
    reading_missing: bool,
}

impl<'l, P: OutputPin> ControlLoop<'l, P> {
    fn new(id: LoopId, config: &SystemConfig, pin: P) -> Self {
        Self {
            pid: PidController::new(
                id,
                config.loop_config(id),
                config.gain_bounds,
                &config.learning,
            ),
            relay: RelayActuator::new(pin, id.name(), *config.relay_config(id)),
            link: None,
            reading_missing: false,
        }
    }

    fn run(
        &mut self,
        measurement: Option<f32>,
        dt: f32,
        ctx: &CycleContext,
        now_ms: u64,
        storage: &mut impl StoragePort,
        sink: &mut impl EventSink,
    ) -> Result<(), Error> {
        if let Some(snapshot) = self.link.and_then(AdaptationLink::take_result) {
            self.pid.apply_recommendation(snapshot);
        }

        let duty = match measurement {
            Some(value) => {
                if self.reading_missing {
                    info!("{}: reading restored", self.pid.id().name());
                    self.reading_missing = false;
                }
                self.pid.compute_with(value, dt, ctx)
            }
            None => {
                if !self.reading_missing {
                    warn!("{}: no valid reading, output held at 0", self.pid.id().name());
                    self.reading_missing = true;
                }
                0.0
            }
        };

        let relay_result = if self.pid.is_emergency_stop() {
            self.relay.safety_disable(now_ms)
        } else {
            self.relay.safety_enable();
            self.relay.set_duty(duty);
            self.relay.update(now_ms)
        };

        if let Some(link) = self.link {
            if let Some(req) = self.pid.take_lookup_request() {
                link.request(req);
            }
            if let Some(sample) = self.pid.take_performance_sample() {
                link.submit_sample(sample);
            }
        }

        self.pid.persist_if_dirty(storage);
        self.drain_events(sink);
        relay_result.map_err(Error::from)
    }

    fn drain_events(&mut self, sink: &mut impl EventSink) {
        while let Some(event) = self.pid.take_event() {
            sink.emit(&event);
        }
    }

    fn status(&self) -> ControllerStatus {
        ControllerStatus {
            relay_on: self.relay.is_on(),
            duty: self.relay.duty(),
            ..self.pid.status()
        }
    }

    pub fn pid(&self) -> &PidController {
        &self.pid
    }

    pub fn relay(&self) -> &RelayActuator<P> {
        &self.relay
    }
}

// ───────────────────────────────────────────────────────────────
// ControlService
// ───────────────────────────────────────────────────────────────

/// The application service orchestrates both control loops.
pub struct ControlService<'l, P: OutputPin> {
    config: SystemConfig,
    heater: ControlLoop<'l, P>,
    co2: ControlLoop<'l, P>,
    /// Seconds per control tick (derived from config).
    tick_secs: f32,
    tick_count: u64,
    last_status_ms: u64,
}

impl<'l, P: OutputPin> ControlService<'l, P> {
    /// Construct the service from configuration.
    ///
    /// Does **not** touch storage or pins; call [`start`](Self::start) next.
    pub fn new(config: SystemConfig, heater_pin: P, co2_pin: P) -> Self {
        let tick_secs = config.control_loop_interval_ms as f32 / 1000.0;
        Self {
            heater: ControlLoop::new(LoopId::Heater, &config, heater_pin),
            co2: ControlLoop::new(LoopId::Co2, &config, co2_pin),
            config,
            tick_secs,
            tick_count: 0,
            last_status_ms: 0,
        }
    }

    /// Connect each loop to its adaptation worker.
    #[must_use]
    pub fn with_links(mut self, heater: &'l AdaptationLink, co2: &'l AdaptationLink) -> Self {
        heater.set_enabled(self.config.learning.enabled);
        co2.set_enabled(self.config.learning.enabled);
        self.heater.link = Some(heater);
        self.co2.link = Some(co2);
        self
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Restore persisted gains and drive both relays off.
    pub fn start(&mut self, storage: &impl StoragePort) -> Result<(), Error> {
        self.heater.pid.restore(storage);
        self.co2.pid.restore(storage);
        self.heater.relay.begin(0)?;
        self.co2.relay.begin(0)?;
        info!(
            "ControlService started (period {} ms)",
            self.config.control_loop_interval_ms
        );
        Ok(())
    }

    /// Persist both loops (call before shutdown or restart).
    pub fn flush(&mut self, storage: &mut impl StoragePort) -> Result<(), Error> {
        let heater = self.heater.pid.flush(storage);
        let co2 = self.co2.pid.flush(storage);
        heater.and(co2)?;
        info!("Controller state flushed");
        Ok(())
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one control cycle for both loops.
    ///
    /// Both loops always run; the first relay error, if any, is returned
    /// after the cycle completes.
    pub fn tick(
        &mut self,
        frame: &SensorFrame,
        storage: &mut impl StoragePort,
        sink: &mut impl EventSink,
    ) -> Result<(), Error> {
        self.tick_count += 1;
        let now_ms = self.uptime_ms();
        let ctx = CycleContext::from_frame(frame, self.config.learning.hemisphere);

        let heater = self
            .heater
            .run(frame.temperature, self.tick_secs, &ctx, now_ms, storage, sink);
        let co2 = self
            .co2
            .run(frame.ph, self.tick_secs, &ctx, now_ms, storage, sink);

        if now_ms.saturating_sub(self.last_status_ms) >= u64::from(self.config.status_interval_ms) {
            self.last_status_ms = now_ms;
            sink.emit(&AppEvent::Status(self.heater.status()));
            sink.emit(&AppEvent::Status(self.co2.status()));
        }

        heater.and(co2)
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an external command (operator console, uplink, scheduler).
    pub fn handle_command(
        &mut self,
        cmd: AppCommand,
        storage: &mut impl StoragePort,
        sink: &mut impl EventSink,
    ) -> Result<(), Error> {
        let transition_ms = self.config.loop_config(cmd.loop_id()).transition_ms;
        let lp = self.loop_mut(cmd.loop_id());
        let result = match cmd {
            AppCommand::SetTarget { target, .. } => lp.pid.set_target(target).map_err(Error::from),
            AppCommand::SetGains { gains, .. } => {
                lp.pid.set_gains(gains);
                Ok(())
            }
            AppCommand::SetGainsSmooth {
                gains, duration_ms, ..
            } => {
                lp.pid
                    .set_gains_smooth(gains, duration_ms.unwrap_or(transition_ms));
                Ok(())
            }
            AppCommand::StartAutoTune { amplitude, .. } => lp.pid.start_autotune(amplitude),
            AppCommand::StopAutoTune(_) => {
                lp.pid.stop_autotune();
                Ok(())
            }
            AppCommand::ClearEmergencyStop(_) => {
                if lp.pid.clear_emergency_stop() {
                    lp.relay.safety_enable();
                }
                Ok(())
            }
            AppCommand::SetAdaptation { enabled, .. } => {
                lp.pid.set_adaptation_enabled(enabled);
                Ok(())
            }
            AppCommand::SetLearning { enabled, .. } => {
                lp.pid.set_learning_enabled(enabled);
                if let Some(link) = lp.link {
                    link.set_enabled(enabled);
                }
                Ok(())
            }
            AppCommand::Reset(_) => {
                lp.pid.reset();
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Command {:?} rejected: {}", cmd, e);
        }
        lp.pid.persist_if_dirty(storage);
        lp.drain_events(sink);
        result
    }

    // ── Queries ───────────────────────────────────────────────

    fn loop_mut(&mut self, id: LoopId) -> &mut ControlLoop<'l, P> {
        match id {
            LoopId::Heater => &mut self.heater,
            LoopId::Co2 => &mut self.co2,
        }
    }

    pub fn control_loop(&self, id: LoopId) -> &ControlLoop<'l, P> {
        match id {
            LoopId::Heater => &self.heater,
            LoopId::Co2 => &self.co2,
        }
    }

    /// Read-only status snapshot for telemetry collaborators.
    pub fn status(&self, id: LoopId) -> ControllerStatus {
        self.control_loop(id).status()
    }

    /// Total control ticks executed since startup.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Service clock derived from the fixed control period.
    pub fn uptime_ms(&self) -> u64 {
        self.tick_count * u64::from(self.config.control_loop_interval_ms)
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    struct NullPin;

    impl embedded_hal::digital::ErrorType for NullPin {
        type Error = Infallible;
    }

    impl OutputPin for NullPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    #[test]
    fn uptime_follows_control_period() {
        let svc = ControlService::new(SystemConfig::default(), NullPin, NullPin);
        assert_eq!(svc.uptime_ms(), 0);
        assert_eq!(svc.tick_count(), 0);
        assert_eq!(svc.status(LoopId::Co2).name, "CO2");
        assert!((svc.status(LoopId::Heater).target - 25.0).abs() < 1e-6);
    }

    #[test]
    fn command_loop_id() {
        let cmd = AppCommand::StartAutoTune {
            loop_id: LoopId::Co2,
            amplitude: 30.0,
        };
        assert_eq!(cmd.loop_id(), LoopId::Co2);
        assert_eq!(AppCommand::Reset(LoopId::Heater).loop_id(), LoopId::Heater);
    }
}
