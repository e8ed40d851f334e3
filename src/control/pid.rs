//! Self-adapting PID controller.
//!
//! One instance per control loop.  [`PidController::compute`] is the
//! whole per-cycle contract and never blocks:
//!
//! 1. Sanitise `dt` and the measurement, advance the controller clock.
//! 2. Safety interlock on the raw measurement.  A trip latches the
//!    output at zero and nothing else runs.
//! 3. Input filter, gain transition, setpoint ramp.
//! 4. Auto-tune bypass, or P + I (anti-windup) + D + feed-forward.
//! 5. Clamp, metrics, ring buffers.
//! 6. Health check, self-adaptation, learning window, cache consult.
//!
//! Each call is timed into a [`ComputeProfile`] against its own `dt`.
//!
//! Reverse-acting loops are handled by negating measurement and target
//! at the boundary.  Everything below works in control space, where a
//! positive error always means "drive harder".
//!
//! The controller never touches storage or the lookup store from
//! `compute`.  Gain persistence happens in [`PidController::persist_if_dirty`],
//! which the service calls after each cycle; lookups leave as a pending
//! [`LookupRequest`] and come back through [`PidController::apply_recommendation`].

use std::time::Instant;

use heapless::{Deque, HistoryBuffer};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::adapter::{ErrorStats, GainAdapter};
use super::autotune::{AutoTuneStatus, AutoTuner};
use super::feed_forward::FeedForward;
use super::filter::InputFilter;
use super::gains::{GainBounds, Gains};
use super::health::{HealthChange, HealthMonitor};
use super::profile::ComputeProfile;
use super::transition::{ParameterTransition, TransitionStep};
use crate::app::events::{AppEvent, ControllerStatus, GainSource};
use crate::app::ports::{ConfigError, StorageError, StoragePort, TypedStore};
use crate::config::{LearningConfig, LoopConfig, LoopId};
use crate::error::{AutoTuneFailure, Error, SafetyFault};
use crate::learning::cache::{LookupRequest, MlCacheSnapshot, MlGainCache, blend_recommendation};
use crate::learning::context::CycleContext;
use crate::learning::store::PerformanceSample;

/// Ring buffer length for error, output and input history.
pub const HISTORY_LEN: usize = 100;
const EVENT_QUEUE: usize = 16;
const GAINS_KEY: &str = "gains";
const CACHE_KEY: &str = "ml_cache";
/// Settled when |error| is within this fraction of the target.
const SETTLE_BAND: f32 = 0.02;

/// Persisted per-loop record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainRecord {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub target: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Metrics {
    settled: bool,
    settling_start_ms: u64,
    settling_time_s: f32,
    max_overshoot: f32,
    steady_state_error: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct PerformanceWindow {
    start_ms: u64,
    error_sum: f32,
    error_sq_sum: f32,
    output_sum: f32,
    count: u32,
}

pub struct PidController {
    id: LoopId,
    cfg: LoopConfig,
    bounds: GainBounds,
    learning: LearningConfig,
    sign: f32,

    // ── Controller state ──
    gains: Gains,
    target: f32,
    effective_target: f32,
    integral: f32,
    derivative: f32,
    last_error: f32,
    last_output: f32,
    last_raw: Option<f32>,
    last_pv: Option<f32>,
    clock_ms: u64,
    control_actions: u32,

    // ── Collaborators ──
    safety: crate::safety::SafetyGuard,
    filter: Option<InputFilter>,
    transition: ParameterTransition,
    autotuner: AutoTuner,
    adapter: GainAdapter,
    health: HealthMonitor,
    feed_forward: FeedForward,
    cache: MlGainCache,

    errors: HistoryBuffer<f32, HISTORY_LEN>,
    outputs: HistoryBuffer<f32, HISTORY_LEN>,
    inputs: HistoryBuffer<f32, HISTORY_LEN>,

    metrics: Metrics,
    window: PerformanceWindow,
    profile: ComputeProfile,

    // ── Adaptation / learning ──
    adaptation_enabled: bool,
    learning_enabled: bool,
    last_query_ms: Option<u64>,
    ml_confidence: f32,
    pending_request: Option<LookupRequest>,
    pending_sample: Option<PerformanceSample>,

    // ── Persistence / events ──
    dirty: bool,
    cache_dirty: bool,
    retry_at_ms: Option<u64>,
    events: Deque<AppEvent, EVENT_QUEUE>,
}

impl PidController {
    pub fn new(id: LoopId, cfg: &LoopConfig, bounds: GainBounds, learning: &LearningConfig) -> Self {
        let target = if cfg.target.is_finite() { cfg.target } else { 0.0 };
        Self {
            id,
            cfg: *cfg,
            bounds,
            learning: *learning,
            sign: cfg.action.sign(),

            gains: bounds.clamp(cfg.gains()),
            target,
            effective_target: target,
            integral: 0.0,
            derivative: 0.0,
            last_error: 0.0,
            last_output: 0.0,
            last_raw: None,
            last_pv: None,
            clock_ms: 0,
            control_actions: 0,

            safety: crate::safety::SafetyGuard::new(cfg.safety_margin),
            filter: cfg
                .filter
                .enabled
                .then(|| InputFilter::new(cfg.filter.process_noise, cfg.filter.measurement_noise)),
            transition: ParameterTransition::new(),
            autotuner: AutoTuner::new(cfg.autotune_timeout_ms),
            adapter: GainAdapter::new(cfg.adaptation_interval_ms),
            health: HealthMonitor::new(cfg.health_interval_ms),
            feed_forward: FeedForward::new(cfg.feed_forward),
            cache: MlGainCache::new(learning.cache_validity_ms, cfg.buckets),

            errors: HistoryBuffer::new(),
            outputs: HistoryBuffer::new(),
            inputs: HistoryBuffer::new(),

            metrics: Metrics::default(),
            window: PerformanceWindow::default(),
            profile: ComputeProfile::new(),

            adaptation_enabled: cfg.adaptation_enabled,
            learning_enabled: learning.enabled,
            last_query_ms: None,
            ml_confidence: 0.0,
            pending_request: None,
            pending_sample: None,

            dirty: false,
            cache_dirty: false,
            retry_at_ms: None,
            events: Deque::new(),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Per-cycle computation
    // ───────────────────────────────────────────────────────────────

    /// Compute one output with no auxiliary context.
    pub fn compute(&mut self, input: f32, dt: f32) -> f32 {
        self.compute_with(input, dt, &CycleContext::default())
    }

    /// Compute one output.  `dt` is in seconds; the result is a duty
    /// cycle within the configured output range, or exactly 0 while the
    /// emergency stop is latched.
    pub fn compute_with(&mut self, input: f32, dt: f32, ctx: &CycleContext) -> f32 {
        let dt = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };
        let started = Instant::now();
        let out = self.compute_cycle(input, dt, ctx);
        let elapsed_us = u32::try_from(started.elapsed().as_micros()).unwrap_or(u32::MAX);
        let period_us = (dt * 1_000_000.0).min(u32::MAX as f32) as u32;
        self.profile.record(elapsed_us, period_us);
        if period_us > 0 && elapsed_us > period_us {
            warn!(
                "PID '{}': compute took {} us, period {} us",
                self.id.name(),
                elapsed_us,
                period_us
            );
        }
        out
    }

    fn compute_cycle(&mut self, input: f32, dt: f32, ctx: &CycleContext) -> f32 {
        self.clock_ms = self.clock_ms.saturating_add((dt * 1000.0).round() as u64);
        let now = self.clock_ms;

        let raw = if input.is_finite() {
            input
        } else if let Some(last) = self.last_raw {
            last
        } else {
            self.last_output = self.cfg.output_min;
            return self.last_output;
        };
        self.last_raw = Some(raw);

        let filtered = match self.filter.as_mut() {
            Some(f) => f.update(raw),
            None => raw,
        };

        // Safety first, on the raw reading.
        let was_tripped = self.safety.is_tripped();
        if let Err(fault) = self
            .safety
            .check(self.id.name(), self.sign * raw, self.sign * self.target, now)
        {
            if !was_tripped {
                self.on_emergency_stop(fault);
            }
            self.last_output = 0.0;
            return 0.0;
        }

        match self.transition.step(now) {
            TransitionStep::Interpolating(g) => self.gains = self.bounds.clamp(g),
            TransitionStep::Finished(g) => {
                self.gains = self.bounds.clamp(g);
                info!(
                    "PID '{}': transition complete Kp={:.3} Ki={:.3} Kd={:.3}",
                    self.id.name(),
                    self.gains.kp,
                    self.gains.ki,
                    self.gains.kd
                );
                self.gains_changed(GainSource::Transition);
            }
            TransitionStep::Idle => {}
        }

        self.ramp_target(dt);

        let pv = self.sign * filtered;
        let sp = self.sign * self.effective_target;
        let error = sp - pv;

        if self.autotuner.is_active() {
            let out = self
                .autotuner
                .output(error)
                .clamp(self.cfg.output_min, self.cfg.output_max);
            let status = self.autotuner.observe(error, now);
            self.on_autotune_status(status);
            self.record(filtered, pv, error, out);
            return out;
        }

        let g = self.gains;
        let p = g.kp * error;
        let i = g.ki * self.integrate(error, dt);
        let d = self.derivative_term(pv, error, dt);
        let ff = self.feed_forward.compute(ctx.ambient, ctx.tds, ctx.ph);

        let sum = p + i + d + ff;
        let out = if sum.is_finite() {
            sum.clamp(self.cfg.output_min, self.cfg.output_max)
        } else {
            self.cfg.output_min
        };

        debug!(
            "PID '{}': pv={:.3} sp={:.3} e={:.3} P={:.2} I={:.2} D={:.2} FF={:.2} out={:.1}",
            self.id.name(),
            filtered,
            self.effective_target,
            error,
            p,
            i,
            d,
            ff,
            out
        );

        self.update_metrics(pv, now);
        self.record(filtered, pv, error, out);

        if self.cfg.health_enabled && self.health.due(now) {
            self.run_health_check(out, error, now);
        }
        if self.adaptation_enabled && !self.transition.is_active() {
            self.self_adapt(now);
        }
        self.accumulate_window(filtered, error, out, ctx, now);
        self.consult_cache(filtered, ctx, now);

        out
    }

    fn ramp_target(&mut self, dt: f32) {
        if !self.cfg.ramp_enabled || self.cfg.ramp_rate <= 0.0 {
            self.effective_target = self.target;
            return;
        }
        let step = self.cfg.ramp_rate * dt;
        let gap = self.target - self.effective_target;
        if gap.abs() <= step {
            self.effective_target = self.target;
        } else {
            self.effective_target += step.copysign(gap);
        }
    }

    /// Advance the integral and return it.
    fn integrate(&mut self, error: f32, dt: f32) -> f32 {
        if dt <= 0.0 {
            return self.integral;
        }
        let pushes_further = (self.last_output >= self.cfg.output_max && error > 0.0)
            || (self.last_output <= self.cfg.output_min && error < 0.0);
        if !(self.cfg.anti_windup && pushes_further) {
            self.integral += error * dt;
        }
        if self.cfg.anti_windup {
            let max = self.cfg.integral_max.abs();
            self.integral = self.integral.clamp(-max, max);
        }
        self.integral
    }

    fn derivative_term(&mut self, pv: f32, error: f32, dt: f32) -> f32 {
        if dt <= 0.0 {
            return self.gains.kd * self.derivative;
        }
        if self.cfg.derivative_filter_enabled {
            // On measurement: a setpoint step produces no kick.
            let raw = self.last_pv.map_or(0.0, |prev| -(pv - prev) / dt);
            let a = self.cfg.derivative_filter.clamp(0.0, 1.0);
            self.derivative = a * raw + (1.0 - a) * self.derivative;
        } else {
            self.derivative = if self.last_pv.is_some() {
                (error - self.last_error) / dt
            } else {
                0.0
            };
        }
        if !self.derivative.is_finite() {
            self.derivative = 0.0;
        }
        self.gains.kd * self.derivative
    }

    fn update_metrics(&mut self, pv: f32, now: u64) {
        let sp = self.sign * self.target;
        let error = sp - pv;
        let band = sp.abs() * SETTLE_BAND;
        let m = &mut self.metrics;
        if error.abs() <= band {
            if !m.settled {
                m.settled = true;
                m.settling_time_s = now.saturating_sub(m.settling_start_ms) as f32 / 1000.0;
            }
            m.steady_state_error = error;
        } else {
            m.settled = false;
        }
        if pv > sp && sp.abs() > f32::EPSILON {
            let overshoot = (pv - sp) / sp.abs() * 100.0;
            m.max_overshoot = m.max_overshoot.max(overshoot);
        }
    }

    fn record(&mut self, filtered: f32, pv: f32, error: f32, out: f32) {
        self.errors.write(error);
        self.outputs.write(out);
        self.inputs.write(filtered);
        self.last_error = error;
        self.last_output = out;
        self.last_pv = Some(pv);
        self.control_actions = self.control_actions.wrapping_add(1);
    }

    // ───────────────────────────────────────────────────────────────
    // Supervision
    // ───────────────────────────────────────────────────────────────

    fn on_emergency_stop(&mut self, fault: SafetyFault) {
        let (measured, limit) = match fault {
            SafetyFault::LimitExceeded { measured, limit } => (self.sign * measured, self.sign * limit),
            SafetyFault::Latched => (self.last_raw.unwrap_or(0.0), self.safety_limit()),
        };
        self.push_event(AppEvent::EmergencyStop {
            loop_id: self.id,
            measured,
            limit,
        });
        if self.autotuner.is_active() {
            self.autotuner.stop();
            warn!("PID '{}': auto-tune aborted by emergency stop", self.id.name());
            self.push_event(AppEvent::AutoTuneFailed {
                loop_id: self.id,
                reason: AutoTuneFailure::Aborted,
            });
        }
    }

    fn on_autotune_status(&mut self, status: AutoTuneStatus) {
        match status {
            AutoTuneStatus::Complete(zn) => {
                let gains = self.bounds.clamp(zn.gains);
                self.transition.cancel();
                self.gains = gains;
                self.integral = 0.0;
                self.derivative = 0.0;
                self.push_event(AppEvent::AutoTuneComplete {
                    loop_id: self.id,
                    gains,
                    ultimate_gain: zn.ultimate_gain,
                    ultimate_period_s: zn.ultimate_period_s,
                });
                self.gains_changed(GainSource::AutoTune);
            }
            AutoTuneStatus::Failed(reason) => {
                self.push_event(AppEvent::AutoTuneFailed {
                    loop_id: self.id,
                    reason,
                });
            }
            AutoTuneStatus::Idle | AutoTuneStatus::Running => {}
        }
    }

    fn run_health_check(&mut self, out: f32, error: f32, now: u64) {
        let change = self.health.check(
            self.id.name(),
            out,
            error,
            self.cfg.output_min,
            self.cfg.output_max,
            now,
        );
        match change {
            Some(HealthChange::Degraded) => self.push_event(AppEvent::HealthDegraded {
                loop_id: self.id,
                metrics: self.health.metrics(),
            }),
            Some(HealthChange::Recovered) => self.push_event(AppEvent::HealthRecovered(self.id)),
            None => {}
        }
    }

    fn self_adapt(&mut self, now: u64) {
        let stats = ErrorStats::from_samples(self.errors.as_slice().iter());
        if let Some(next) = self
            .adapter
            .adapt(self.id.name(), self.gains, stats, &self.bounds, now)
        {
            self.gains = next;
            self.gains_changed(GainSource::Adaptation);
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Learning
    // ───────────────────────────────────────────────────────────────

    fn accumulate_window(&mut self, value: f32, error: f32, out: f32, ctx: &CycleContext, now: u64) {
        if !self.learning_enabled {
            return;
        }
        let w = &mut self.window;
        if w.count == 0 {
            w.start_ms = now;
        }
        w.error_sum += error;
        w.error_sq_sum += error * error;
        w.output_sum += out;
        w.count += 1;

        if now.saturating_sub(w.start_ms) < self.learning.performance_window_ms {
            return;
        }
        let w = core::mem::take(&mut self.window);
        let Some(ambient) = ctx.ambient else {
            debug!("PID '{}': performance window dropped (no ambient reading)", self.id.name());
            return;
        };
        let n = w.count as f32;
        let mean = w.error_sum / n;
        let variance = (w.error_sq_sum / n - mean * mean).max(0.0);
        self.pending_sample = Some(PerformanceSample {
            timestamp_ms: now,
            value,
            target: self.target,
            ambient,
            hour: ctx.hour,
            season: ctx.season,
            tank_volume: ctx.tank_volume.unwrap_or(0.0),
            gains: self.gains,
            error_mean: mean,
            error_variance: variance,
            settling_time_s: self.metrics.settling_time_s,
            overshoot: self.metrics.max_overshoot / 100.0,
            steady_state_error: self.metrics.steady_state_error,
            average_output: w.output_sum / n,
            sample_count: w.count,
            score: 0.0,
        });
    }

    fn consult_cache(&mut self, value: f32, ctx: &CycleContext, now: u64) {
        if !self.learning_enabled || self.transition.is_active() {
            return;
        }
        if self
            .last_query_ms
            .is_some_and(|last| now.saturating_sub(last) < self.learning.query_interval_ms)
        {
            return;
        }
        let Some(ambient) = ctx.ambient else {
            return;
        };
        self.last_query_ms = Some(now);

        let req = LookupRequest {
            value,
            ambient,
            hour: ctx.hour,
            season: ctx.season,
            issued_ms: now,
        };
        match self.cache.lookup(&req) {
            Some(snapshot) => {
                self.blend(snapshot);
            }
            None => self.pending_request = Some(req),
        }
    }

    /// Deliver a worker result.  Stores it in the cache and blends it
    /// into the running gains.  Returns `true` if the gains changed.
    pub fn apply_recommendation(&mut self, snapshot: MlCacheSnapshot) -> bool {
        self.cache.store(snapshot);
        self.cache_dirty = true;
        if self.transition.is_active() || self.autotuner.is_active() {
            return false;
        }
        self.blend(snapshot)
    }

    fn blend(&mut self, snapshot: MlCacheSnapshot) -> bool {
        self.ml_confidence = snapshot.confidence;
        let Some(next) = blend_recommendation(
            self.gains,
            snapshot.gains,
            snapshot.confidence,
            self.performance_metric(),
            &self.learning.blend,
            &self.bounds,
        ) else {
            return false;
        };
        if next == self.gains {
            return false;
        }
        info!(
            "PID '{}': learned gains Kp={:.3} Ki={:.3} Kd={:.3} (confidence {:.2})",
            self.id.name(),
            next.kp,
            next.ki,
            next.kd,
            snapshot.confidence
        );
        self.gains = next;
        self.gains_changed(GainSource::Learning);
        true
    }

    /// Lookup the worker should run, if the cache missed this cycle.
    pub fn take_lookup_request(&mut self) -> Option<LookupRequest> {
        self.pending_request.take()
    }

    /// Closed performance window ready for the lookup store.
    pub fn take_performance_sample(&mut self) -> Option<PerformanceSample> {
        self.pending_sample.take()
    }

    // ───────────────────────────────────────────────────────────────
    // Operator surface
    // ───────────────────────────────────────────────────────────────

    pub fn set_target(&mut self, target: f32) -> Result<(), ConfigError> {
        if !target.is_finite() {
            return Err(ConfigError::ValidationFailed("target must be finite"));
        }
        self.target = target;
        if !self.cfg.ramp_enabled {
            self.effective_target = target;
        }
        self.metrics = Metrics {
            settling_start_ms: self.clock_ms,
            ..Metrics::default()
        };
        self.dirty = true;
        info!("PID '{}': target set to {:.2}", self.id.name(), target);
        Ok(())
    }

    /// Replace the gains immediately.  Returns the clamped gains applied.
    pub fn set_gains(&mut self, gains: Gains) -> Gains {
        self.transition.cancel();
        self.gains = self.bounds.clamp(gains);
        info!(
            "PID '{}': gains set Kp={:.3} Ki={:.3} Kd={:.3}",
            self.id.name(),
            self.gains.kp,
            self.gains.ki,
            self.gains.kd
        );
        self.gains_changed(GainSource::Manual);
        self.gains
    }

    /// Move to `gains` linearly over `duration_ms`.  Replaces any
    /// transition in flight.
    pub fn set_gains_smooth(&mut self, gains: Gains, duration_ms: u32) {
        if duration_ms == 0 {
            self.set_gains(gains);
            return;
        }
        let target = self.bounds.clamp(gains);
        self.transition.begin(self.gains, target, self.clock_ms, duration_ms);
        info!(
            "PID '{}': transition to Kp={:.3} Ki={:.3} Kd={:.3} over {} ms",
            self.id.name(),
            target.kp,
            target.ki,
            target.kd,
            duration_ms
        );
    }

    pub fn start_autotune(&mut self, amplitude: f32) -> Result<(), Error> {
        if self.safety.is_tripped() {
            return Err(SafetyFault::Latched.into());
        }
        // The relay swing is clamped to the output range; a larger
        // amplitude would overstate the ultimate gain.
        if amplitude > self.cfg.output_max - self.cfg.output_min {
            return Err(AutoTuneFailure::InvalidAmplitude.into());
        }
        self.autotuner.start(amplitude, self.clock_ms)?;
        self.transition.cancel();
        self.integral = 0.0;
        self.derivative = 0.0;
        info!("PID '{}': auto-tune started (amplitude {:.1})", self.id.name(), amplitude);
        Ok(())
    }

    /// Cancel a running auto-tune without touching the gains.
    pub fn stop_autotune(&mut self) -> bool {
        if !self.autotuner.is_active() {
            return false;
        }
        self.autotuner.stop();
        info!("PID '{}': auto-tune stopped", self.id.name());
        true
    }

    /// Release the safety latch and restart from a clean integral.
    pub fn clear_emergency_stop(&mut self) -> bool {
        if !self.safety.clear(self.id.name()) {
            return false;
        }
        self.integral = 0.0;
        self.derivative = 0.0;
        self.last_pv = None;
        self.push_event(AppEvent::EmergencyCleared(self.id));
        true
    }

    pub fn set_adaptation_enabled(&mut self, enabled: bool) {
        self.adaptation_enabled = enabled;
        info!(
            "PID '{}': self-adaptation {}",
            self.id.name(),
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn set_learning_enabled(&mut self, enabled: bool) {
        self.learning_enabled = enabled;
        if !enabled {
            self.window = PerformanceWindow::default();
            self.pending_request = None;
            self.pending_sample = None;
        }
        info!(
            "PID '{}': learning {}",
            self.id.name(),
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Clear the dynamic state.  Gains and target are kept.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.derivative = 0.0;
        self.last_error = 0.0;
        self.last_output = 0.0;
        self.last_pv = None;
        self.effective_target = self.target;
        self.errors.clear();
        self.outputs.clear();
        self.inputs.clear();
        if let Some(f) = self.filter.as_mut() {
            f.reset();
        }
        self.transition.cancel();
        self.autotuner.stop();
        self.health.reset();
        self.metrics = Metrics {
            settling_start_ms: self.clock_ms,
            ..Metrics::default()
        };
        self.window = PerformanceWindow::default();
        info!("PID '{}': reset", self.id.name());
    }

    // ───────────────────────────────────────────────────────────────
    // Persistence
    // ───────────────────────────────────────────────────────────────

    /// Load gains and target saved by a previous run.  Missing or corrupt
    /// records keep the configured defaults.
    pub fn restore(&mut self, storage: &impl StoragePort) {
        let default = self.record_value();
        let rec: GainRecord = storage.load_value(self.id.namespace(), GAINS_KEY, default);
        self.gains = self.bounds.clamp(Gains::new(rec.kp, rec.ki, rec.kd));
        if rec.target.is_finite() {
            self.target = rec.target;
            self.effective_target = rec.target;
        }
        info!(
            "PID '{}': restored Kp={:.3} Ki={:.3} Kd={:.3} target={:.2}",
            self.id.name(),
            self.gains.kp,
            self.gains.ki,
            self.gains.kd,
            self.target
        );

        let cached: Option<MlCacheSnapshot> = storage.try_load_value(self.id.namespace(), CACHE_KEY);
        if let Some(snap) = cached {
            // The control clock restarts at zero on boot.
            self.cache.store(MlCacheSnapshot {
                updated_ms: self.clock_ms,
                ..snap
            });
            self.ml_confidence = snap.confidence;
            info!(
                "PID '{}': restored cached recommendation (confidence {:.2})",
                self.id.name(),
                snap.confidence
            );
        }
    }

    /// Save the gain record and cached recommendation if either changed.  A failed write keeps the
    /// state dirty and is retried after `persist_retry_ms`.
    pub fn persist_if_dirty(&mut self, storage: &mut impl StoragePort) -> bool {
        if !(self.dirty || self.cache_dirty) || self.retry_at_ms.is_some_and(|at| self.clock_ms < at) {
            return false;
        }
        match self.save(storage) {
            Ok(()) => true,
            Err(error) => {
                self.retry_at_ms = Some(self.clock_ms.saturating_add(self.cfg.persist_retry_ms));
                warn!(
                    "PID '{}': gain save failed ({}), retrying in {} ms",
                    self.id.name(),
                    error,
                    self.cfg.persist_retry_ms
                );
                self.push_event(AppEvent::PersistenceFailed {
                    loop_id: self.id,
                    error,
                });
                false
            }
        }
    }

    /// Final persist on shutdown.
    pub fn flush(&mut self, storage: &mut impl StoragePort) -> Result<(), StorageError> {
        self.dirty = true;
        self.cache_dirty = self.cache.snapshot().is_some();
        self.save(storage)
    }

    fn save(&mut self, storage: &mut impl StoragePort) -> Result<(), StorageError> {
        if self.dirty {
            storage.save_value(self.id.namespace(), GAINS_KEY, &self.record_value())?;
            self.dirty = false;
            debug!("PID '{}': gains persisted", self.id.name());
        }
        if self.cache_dirty {
            if let Some(snap) = self.cache.snapshot() {
                storage.save_value(self.id.namespace(), CACHE_KEY, snap)?;
            }
            self.cache_dirty = false;
        }
        self.retry_at_ms = None;
        Ok(())
    }

    fn record_value(&self) -> GainRecord {
        GainRecord {
            kp: self.gains.kp,
            ki: self.gains.ki,
            kd: self.gains.kd,
            target: self.target,
        }
    }

    fn gains_changed(&mut self, source: GainSource) {
        self.dirty = true;
        self.push_event(AppEvent::GainsChanged {
            loop_id: self.id,
            gains: self.gains,
            source,
        });
    }

    fn push_event(&mut self, event: AppEvent) {
        if self.events.is_full() {
            self.events.pop_front();
        }
        let _ = self.events.push_back(event);
    }

    pub fn take_event(&mut self) -> Option<AppEvent> {
        self.events.pop_front()
    }

    // ───────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────

    pub fn id(&self) -> LoopId {
        self.id
    }

    pub fn gains(&self) -> Gains {
        self.gains
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn effective_target(&self) -> f32 {
        self.effective_target
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn last_output(&self) -> f32 {
        self.last_output
    }

    pub fn is_emergency_stop(&self) -> bool {
        self.safety.is_tripped()
    }

    /// Measurement at which the interlock trips, in process units.
    pub fn safety_limit(&self) -> f32 {
        self.sign * self.safety.limit(self.sign * self.target)
    }

    pub fn is_auto_tuning(&self) -> bool {
        self.autotuner.is_active()
    }

    pub fn in_transition(&self) -> bool {
        self.transition.is_active()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_learning_enabled(&self) -> bool {
        self.learning_enabled
    }

    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    pub fn error_history(&self) -> impl Iterator<Item = &f32> {
        self.errors.oldest_ordered()
    }

    pub fn output_history(&self) -> impl Iterator<Item = &f32> {
        self.outputs.oldest_ordered()
    }

    pub fn input_history(&self) -> impl Iterator<Item = &f32> {
        self.inputs.oldest_ordered()
    }

    /// Mean |error| over the history window.
    pub fn performance_metric(&self) -> f32 {
        ErrorStats::from_samples(self.errors.as_slice().iter()).map_or(0.0, |s| s.mean_abs)
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn cache(&self) -> &MlGainCache {
        &self.cache
    }

    pub fn profile(&self) -> &ComputeProfile {
        &self.profile
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            loop_id: self.id,
            name: self.id.name(),
            gains: self.gains,
            target: self.target,
            effective_target: self.effective_target,
            last_input: self.sign * self.last_pv.unwrap_or(self.sign * self.target),
            last_error: self.last_error,
            last_output: self.last_output,
            integral: self.integral,
            emergency_stop: self.safety.is_tripped(),
            emergency_stop_ms: self.safety.tripped_at_ms(),
            settled: self.metrics.settled,
            settling_time_s: self.metrics.settling_time_s,
            max_overshoot: self.metrics.max_overshoot,
            steady_state_error: self.metrics.steady_state_error,
            control_actions: self.control_actions,
            health: self.health.metrics(),
            ml_confidence: self.ml_confidence,
            cache_hit_rate: self.cache.hit_rate(),
            in_transition: self.transition.is_active(),
            auto_tuning: self.autotuner.is_active(),
            filter: self.filter.as_ref().map(InputFilter::state),
            feed_forward: self.feed_forward.last_terms(),
            profile: self.profile,
            relay_on: false,
            duty: self.last_output,
        }
    }
}
