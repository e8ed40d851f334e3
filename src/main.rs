//! TankCtl firmware main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  MailboxReader    LogEventSink   NvsAdapter   Esp32Time        │
//! │  (ReadingsPort)   (EventSink)    (Config+NVS) (clock)          │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌───────────────────────────────┐   ┌──────────────────────┐  │
//! │  │ ControlService (APP core)     │◀─▶│ Adaptation workers   │  │
//! │  │ PID ×2 · Safety · Relay ×2    │   │ (PRO core, NVS I/O)  │  │
//! │  └───────────────────────────────┘   └──────────────────────┘  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::time::Duration;

use anyhow::Result;
use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};
use log::{error, info, warn};

use tankctl::adapters::log_sink::LogEventSink;
use tankctl::adapters::nvs::NvsAdapter;
use tankctl::adapters::readings::{MailboxReader, ReadingsMailbox};
use tankctl::adapters::time::Esp32TimeAdapter;
use tankctl::app::ports::{ConfigPort, ReadingsPort};
use tankctl::app::service::ControlService;
use tankctl::config::{LoopId, SystemConfig};
use tankctl::drivers::task_pin::{Core, spawn_on_core};
use tankctl::drivers::watchdog::Watchdog;
use tankctl::learning::store::GainLookupStore;
use tankctl::learning::worker::{self, AdaptationLink};
use tankctl::pins;

// ── Cross-task statics ────────────────────────────────────────

static HEATER_LINK: AdaptationLink = AdaptationLink::new();
static CO2_LINK: AdaptationLink = AdaptationLink::new();

/// Acquisition publishes compensated readings here.
pub static READINGS: ReadingsMailbox = ReadingsMailbox::new();

/// A frame older than this many control periods counts as missing.
const STALE_PERIODS: u64 = 5;

type RelayPin = PinDriver<'static, AnyOutputPin, Output>;

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  TankCtl v{}                         ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let nvs = match NvsAdapter::new() {
        Ok(n) => n,
        Err(e) => {
            warn!("NVS init failed ({}), running with defaults and no persistence", e);
            NvsAdapter::default()
        }
    };
    let config = match nvs.load() {
        Ok(cfg) => {
            info!("Config loaded from NVS");
            cfg
        }
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            SystemConfig::default()
        }
    };

    // ── 3. Adaptation workers (PRO core) ──────────────────────
    let flush_period = Duration::from_millis(u64::from(config.learning.flush_interval_ms));
    for (id, link, name) in [
        (LoopId::Heater, &HEATER_LINK, "adapt-heater\0"),
        (LoopId::Co2, &CO2_LINK, "adapt-co2\0"),
    ] {
        let store = GainLookupStore::new(id.ml_namespace(), config.loop_config(id).buckets);
        if let Err(e) = worker::spawn(link, store, NvsAdapter::default(), flush_period, name) {
            error!("{}: adaptation worker failed to start ({}), learning disabled", id.name(), e);
            link.set_enabled(false);
        }
    }

    // ── 4. Relay outputs ──────────────────────────────────────
    // SAFETY: each GPIO is claimed exactly once, here.
    let heater_pin = PinDriver::output(unsafe { AnyOutputPin::new(pins::HEATER_RELAY_GPIO) })?;
    let co2_pin = PinDriver::output(unsafe { AnyOutputPin::new(pins::CO2_RELAY_GPIO) })?;

    // ── 5. Control task (APP core) ────────────────────────────
    let control = spawn_on_core(Core::App, 10, 16, "control\0", move || {
        if let Err(e) = run_control(config, nvs, heater_pin, co2_pin) {
            error!("Control task stopped: {}", e);
        }
    })?;

    if control.join().is_err() {
        error!("Control task panicked");
    }
    anyhow::bail!("control task exited")
}

/// Fixed-period control cycle.  Runs on the APP core; the watchdog is
/// subscribed from here so it watches this task.
fn run_control(
    config: SystemConfig,
    mut nvs: NvsAdapter,
    heater_pin: RelayPin,
    co2_pin: RelayPin,
) -> Result<()> {
    let learning_enabled = config.learning.enabled;
    let mut service =
        ControlService::new(config, heater_pin, co2_pin).with_links(&HEATER_LINK, &CO2_LINK);
    if !learning_enabled {
        info!("Learning disabled by config");
    }
    service.start(&nvs)?;

    let period_ms = u64::from(config.control_loop_interval_ms);
    let mut readings = MailboxReader::new(&READINGS, period_ms * STALE_PERIODS);
    let mut log_sink = LogEventSink::new();
    let clock = Esp32TimeAdapter::new();
    let watchdog = Watchdog::new((config.control_loop_interval_ms * 10).max(5_000));

    info!("System ready. Entering control loop.");

    let mut next_ms = clock.uptime_ms();
    loop {
        let frame = readings.latest();
        if let Err(e) = service.tick(&frame, &mut nvs, &mut log_sink) {
            error!("Control tick: {}", e);
        }
        watchdog.feed();

        next_ms += period_ms;
        let now = clock.uptime_ms();
        if next_ms > now {
            std::thread::sleep(Duration::from_millis(next_ms - now));
        } else {
            warn!("Control cycle overran by {} ms", now - next_ms);
            next_ms = now;
        }
    }
}
