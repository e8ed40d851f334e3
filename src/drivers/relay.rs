//! Time-proportional relay driver.
//!
//! Turns a 0–100 % duty cycle into on/off switching of a mains relay
//! (heater element, CO2 solenoid) within a fixed window:
//!
//! ```text
//!  window_ms
//! |<------------------------------>|
//! |#########|                      |   on for duty% of the window
//!  on_ms     off_ms
//! ```
//!
//! ## Safety contract
//!
//! - An on-time shorter than `min_on_ms` keeps the relay off for the
//!   whole window; an off-time shorter than `min_off_ms` keeps it on.
//! - No two switching events are closer than `min_toggle_ms`.  A change
//!   requested earlier is deferred, not dropped.
//! - [`RelayActuator::safety_disable`] forces the relay off immediately,
//!   bypassing the toggle guard, and holds it off until re-enabled.
//!
//! The pin is any `embedded-hal` output: an ESP-IDF `PinDriver` on the
//! device, a mock on the host.

use embedded_hal::digital::OutputPin;
use log::{debug, warn};
use serde::Serialize;

use crate::config::{RelayConfig, RelayMode};
use crate::error::ActuatorError;

/// Duty above which threshold mode switches on.
const THRESHOLD_DUTY: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayWindowState {
    pub window_ms: u32,
    pub window_start_ms: u64,
    pub min_on_ms: u32,
    pub min_off_ms: u32,
    pub on: bool,
    pub last_toggle_ms: Option<u64>,
}

pub struct RelayActuator<P: OutputPin> {
    pin: P,
    name: &'static str,
    cfg: RelayConfig,
    duty: f32,
    on: bool,
    disabled: bool,
    window_start_ms: u64,
    last_toggle_ms: Option<u64>,
    toggles: u32,
}

impl<P: OutputPin> RelayActuator<P> {
    pub fn new(pin: P, name: &'static str, cfg: RelayConfig) -> Self {
        Self {
            pin,
            name,
            cfg,
            duty: 0.0,
            on: false,
            disabled: false,
            window_start_ms: 0,
            last_toggle_ms: None,
            toggles: 0,
        }
    }

    /// Drive the pin to the off level and open the first window.
    pub fn begin(&mut self, now_ms: u64) -> Result<(), ActuatorError> {
        self.write_pin(false)?;
        self.on = false;
        self.window_start_ms = now_ms;
        debug!(
            "Relay '{}': ready ({:?}, window {} ms)",
            self.name, self.cfg.mode, self.cfg.window_ms
        );
        Ok(())
    }

    /// Set the duty cycle in percent.  Out-of-range values are clamped.
    pub fn set_duty(&mut self, duty: f32) {
        self.duty = if duty.is_finite() { duty.clamp(0.0, 100.0) } else { 0.0 };
    }

    /// Advance the window and switch the pin if needed.
    pub fn update(&mut self, now_ms: u64) -> Result<(), ActuatorError> {
        if self.disabled {
            return Ok(());
        }
        let desired = match self.cfg.mode {
            RelayMode::Threshold => self.duty > THRESHOLD_DUTY,
            RelayMode::TimeProportional => self.time_proportional(now_ms),
        };
        if desired == self.on {
            return Ok(());
        }
        if let Some(last) = self.last_toggle_ms {
            if now_ms.saturating_sub(last) < u64::from(self.cfg.min_toggle_ms) {
                return Ok(());
            }
        }
        self.switch(desired, now_ms)
    }

    fn time_proportional(&mut self, now_ms: u64) -> bool {
        let window = u64::from(self.cfg.window_ms.max(1));
        let mut elapsed = now_ms.saturating_sub(self.window_start_ms);
        if elapsed >= window {
            self.window_start_ms += window * (elapsed / window);
            elapsed %= window;
        }

        let on_ms = (self.duty / 100.0 * window as f32) as u64;
        let off_ms = window - on_ms.min(window);
        if on_ms > 0 && on_ms < u64::from(self.cfg.min_on_ms) {
            false
        } else if off_ms > 0 && off_ms < u64::from(self.cfg.min_off_ms) {
            true
        } else {
            elapsed < on_ms
        }
    }

    fn switch(&mut self, on: bool, now_ms: u64) -> Result<(), ActuatorError> {
        self.write_pin(on)?;
        self.on = on;
        self.last_toggle_ms = Some(now_ms);
        self.toggles = self.toggles.wrapping_add(1);
        debug!(
            "Relay '{}': {} (duty {:.1}%)",
            self.name,
            if on { "ON" } else { "OFF" },
            self.duty
        );
        Ok(())
    }

    fn write_pin(&mut self, on: bool) -> Result<(), ActuatorError> {
        let high = on != self.cfg.inverted;
        let res = if high { self.pin.set_high() } else { self.pin.set_low() };
        res.map_err(|_| ActuatorError::GpioWriteFailed)
    }

    /// Force the relay off now and hold it off.
    pub fn safety_disable(&mut self, now_ms: u64) -> Result<(), ActuatorError> {
        if !self.disabled {
            warn!("Relay '{}': safety disable", self.name);
        }
        self.disabled = true;
        self.duty = 0.0;
        if self.on {
            self.switch(false, now_ms)?;
        } else {
            self.write_pin(false)?;
        }
        Ok(())
    }

    pub fn safety_enable(&mut self) {
        if self.disabled {
            debug!("Relay '{}': safety enable", self.name);
        }
        self.disabled = false;
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn duty(&self) -> f32 {
        self.duty
    }

    pub fn toggle_count(&self) -> u32 {
        self.toggles
    }

    pub fn window_state(&self) -> RelayWindowState {
        RelayWindowState {
            window_ms: self.cfg.window_ms,
            window_start_ms: self.window_start_ms,
            min_on_ms: self.cfg.min_on_ms,
            min_off_ms: self.cfg.min_off_ms,
            on: self.on,
            last_toggle_ms: self.last_toggle_ms,
        }
    }

    /// Give the pin back (e.g. to reuse it after shutdown).
    pub fn release(self) -> P {
        self.pin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    #[derive(Default)]
    struct Pin {
        high: bool,
        writes: u32,
    }

    impl embedded_hal::digital::ErrorType for Pin {
        type Error = Infallible;
    }

    impl OutputPin for Pin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.high = false;
            self.writes += 1;
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.high = true;
            self.writes += 1;
            Ok(())
        }
    }

    fn relay(cfg: RelayConfig) -> RelayActuator<Pin> {
        let mut r = RelayActuator::new(Pin::default(), "heater", cfg);
        r.begin(0).unwrap();
        r
    }

    fn run(r: &mut RelayActuator<Pin>, from: u64, to: u64) {
        let mut t = from;
        while t < to {
            r.update(t).unwrap();
            t += 100;
        }
    }

    #[test]
    fn zero_duty_never_switches() {
        let mut r = relay(RelayConfig::heater());
        r.set_duty(0.0);
        run(&mut r, 0, 60_000);
        assert_eq!(r.toggle_count(), 0);
        assert!(!r.is_on());
    }

    #[test]
    fn full_duty_switches_on_once() {
        let mut r = relay(RelayConfig::heater());
        r.set_duty(100.0);
        run(&mut r, 0, 60_000);
        assert_eq!(r.toggle_count(), 1);
        assert!(r.is_on());
    }

    #[test]
    fn half_duty_follows_window() {
        let mut r = relay(RelayConfig::heater());
        r.set_duty(50.0);
        r.update(0).unwrap();
        assert!(r.is_on());
        r.update(7_000).unwrap();
        assert!(r.is_on());
        r.update(7_500).unwrap();
        assert!(!r.is_on());
        // Next window.
        r.update(15_000).unwrap();
        assert!(r.is_on());
        assert_eq!(r.window_state().window_start_ms, 15_000);
    }

    #[test]
    fn short_on_time_stays_off() {
        let mut r = relay(RelayConfig::heater());
        // 10 % of 15 s = 1.5 s < 2 s minimum on.
        r.set_duty(10.0);
        run(&mut r, 0, 30_000);
        assert_eq!(r.toggle_count(), 0);
    }

    #[test]
    fn short_off_time_stays_on() {
        let mut r = relay(RelayConfig::heater());
        // 90 % leaves 1.5 s off < 2 s minimum off.
        r.set_duty(90.0);
        run(&mut r, 0, 30_000);
        assert_eq!(r.toggle_count(), 1);
        assert!(r.is_on());
    }

    #[test]
    fn toggle_guard_defers_switch() {
        let mut r = relay(RelayConfig::heater());
        // 20 % of 15 s = 3 s on; the guard holds it on until 5 s.
        r.set_duty(20.0);
        r.update(0).unwrap();
        r.update(3_000).unwrap();
        assert!(r.is_on());
        r.update(4_900).unwrap();
        assert!(r.is_on());
        r.update(5_000).unwrap();
        assert!(!r.is_on());
    }

    #[test]
    fn threshold_mode() {
        let mut r = relay(RelayConfig {
            mode: RelayMode::Threshold,
            ..RelayConfig::heater()
        });
        r.set_duty(50.0);
        r.update(0).unwrap();
        assert!(!r.is_on());
        r.set_duty(51.0);
        r.update(100).unwrap();
        assert!(r.is_on());
    }

    #[test]
    fn safety_disable_bypasses_guard() {
        let mut r = relay(RelayConfig::heater());
        r.set_duty(100.0);
        r.update(0).unwrap();
        assert!(r.is_on());
        r.safety_disable(100).unwrap();
        assert!(!r.is_on());
        assert!(!r.pin.high);
        r.set_duty(100.0);
        r.update(10_000).unwrap();
        assert!(!r.is_on(), "held off until re-enabled");
        r.safety_enable();
        r.set_duty(100.0);
        r.update(10_100).unwrap();
        assert!(r.is_on());
    }

    #[test]
    fn inverted_pin_drives_low_for_on() {
        let mut r = relay(RelayConfig {
            inverted: true,
            ..RelayConfig::heater()
        });
        assert!(r.pin.high);
        r.set_duty(100.0);
        r.update(0).unwrap();
        assert!(r.is_on());
        assert!(!r.pin.high);
    }

    #[test]
    fn duty_is_sanitised() {
        let mut r = relay(RelayConfig::heater());
        r.set_duty(150.0);
        assert_eq!(r.duty(), 100.0);
        r.set_duty(f32::NAN);
        assert_eq!(r.duty(), 0.0);
    }
}
