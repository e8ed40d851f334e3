//! Gain persistence across restarts and storage failures.

use tankctl::adapters::nvs::NvsAdapter;
use tankctl::app::commands::AppCommand;
use tankctl::app::events::AppEvent;
use tankctl::app::ports::{ConfigPort, StorageError};
use tankctl::app::service::ControlService;
use tankctl::config::{LoopId, SystemConfig};
use tankctl::control::gains::Gains;

use crate::mock_hw::{MockNvs, MockPin, RecordingSink, frame};

fn service(config: SystemConfig) -> ControlService<'static, MockPin> {
    ControlService::new(config, MockPin::new(), MockPin::new())
}

#[test]
fn gains_and_target_survive_restart() {
    let mut nvs = MockNvs::new();
    let mut sink = RecordingSink::new();

    let mut first = service(SystemConfig::default());
    first.start(&nvs).unwrap();
    first
        .handle_command(
            AppCommand::SetGains {
                loop_id: LoopId::Heater,
                gains: Gains::new(3.5, 0.25, 0.75),
            },
            &mut nvs,
            &mut sink,
        )
        .unwrap();
    first
        .handle_command(
            AppCommand::SetTarget {
                loop_id: LoopId::Heater,
                target: 26.5,
            },
            &mut nvs,
            &mut sink,
        )
        .unwrap();
    assert!(nvs.contains("heater_pid", "gains"));
    assert!(!nvs.contains("co2_pid", "gains"), "namespaces must not alias");

    let mut second = service(SystemConfig::default());
    second.start(&nvs).unwrap();
    let heater = second.status(LoopId::Heater);
    assert_eq!(heater.gains, Gains::new(3.5, 0.25, 0.75));
    assert_eq!(heater.target, 26.5);
    // The other loop keeps its configured defaults.
    assert_eq!(second.status(LoopId::Co2).target, 6.8);
}

#[test]
fn out_of_bounds_gains_are_clamped_before_saving() {
    let mut nvs = MockNvs::new();
    let mut sink = RecordingSink::new();
    let mut svc = service(SystemConfig::default());
    svc.start(&nvs).unwrap();
    svc.handle_command(
        AppCommand::SetGains {
            loop_id: LoopId::Co2,
            gains: Gains::new(500.0, -1.0, 0.0),
        },
        &mut nvs,
        &mut sink,
    )
    .unwrap();

    let mut restarted = service(SystemConfig::default());
    restarted.start(&nvs).unwrap();
    let bounds = SystemConfig::default().gain_bounds;
    assert_eq!(
        restarted.status(LoopId::Co2).gains,
        Gains::new(bounds.kp_max, bounds.ki_min, bounds.kd_min)
    );
}

#[test]
fn failed_save_is_reported_and_retried() {
    let mut nvs = MockNvs::new();
    let mut sink = RecordingSink::new();
    let mut svc = service(SystemConfig::default());
    svc.start(&nvs).unwrap();

    nvs.fail_writes = true;
    svc.handle_command(
        AppCommand::SetGains {
            loop_id: LoopId::Heater,
            gains: Gains::new(3.0, 0.4, 0.8),
        },
        &mut nvs,
        &mut sink,
    )
    .unwrap();
    assert!(sink.events.contains(&AppEvent::PersistenceFailed {
        loop_id: LoopId::Heater,
        error: StorageError::IoError,
    }));
    assert!(svc.control_loop(LoopId::Heater).pid().is_dirty());

    // Storage recovers, but the retry waits out the back-off.
    nvs.fail_writes = false;
    for _ in 0..59 {
        svc.tick(&frame(25.0, 6.8), &mut nvs, &mut sink).unwrap();
    }
    assert!(!nvs.contains("heater_pid", "gains"));
    svc.tick(&frame(25.0, 6.8), &mut nvs, &mut sink).unwrap();
    assert!(nvs.contains("heater_pid", "gains"));
    assert_eq!(
        sink.count(|e| matches!(e, AppEvent::PersistenceFailed { .. })),
        1
    );
}

#[test]
fn flush_writes_both_loops() {
    let mut nvs = MockNvs::new();
    let mut svc = service(SystemConfig::default());
    svc.start(&nvs).unwrap();
    svc.flush(&mut nvs).unwrap();
    assert!(nvs.contains("heater_pid", "gains"));
    assert!(nvs.contains("co2_pid", "gains"));

    nvs.fail_writes = true;
    assert!(svc.flush(&mut nvs).is_err());
}

#[test]
fn service_runs_on_simulated_nvs() {
    let mut nvs = NvsAdapter::new().unwrap();
    let mut config = nvs.load().unwrap();
    config.heater.target = 24.0;
    nvs.save(&config).unwrap();

    let config = nvs.load().unwrap();
    let mut svc = service(config);
    let mut sink = RecordingSink::new();
    svc.start(&nvs).unwrap();
    svc.tick(&frame(23.0, 6.8), &mut nvs, &mut sink).unwrap();
    assert_eq!(svc.status(LoopId::Heater).target, 24.0);
    svc.flush(&mut nvs).unwrap();

    let mut restarted = service(SystemConfig::default());
    restarted.start(&nvs).unwrap();
    assert_eq!(restarted.status(LoopId::Heater).target, 24.0);
}
