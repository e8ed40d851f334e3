//! ControlService orchestration against mock relays and a simulated tank.

use tankctl::app::commands::AppCommand;
use tankctl::app::events::{AppEvent, GainSource};
use tankctl::app::ports::ConfigError;
use tankctl::app::service::ControlService;
use tankctl::config::{LoopId, SystemConfig};
use tankctl::control::gains::Gains;
use tankctl::error::{AutoTuneFailure, Error};
use tankctl::learning::context::SensorFrame;

use crate::mock_hw::{MockNvs, MockPin, RecordingSink, ThermalPlant, frame};

fn service() -> (ControlService<'static, MockPin>, MockPin, MockPin) {
    let heater = MockPin::new();
    let co2 = MockPin::new();
    let svc = ControlService::new(SystemConfig::default(), heater.clone(), co2.clone());
    (svc, heater, co2)
}

#[test]
fn heater_holds_tank_at_target() {
    let (mut svc, heater_pin, _) = service();
    let mut nvs = MockNvs::new();
    let mut sink = RecordingSink::new();
    svc.start(&nvs).unwrap();

    let mut plant = ThermalPlant::new(23.0, 20.0);
    let mut tail = Vec::new();
    for tick in 0..3 * 3600 {
        svc.tick(&frame(plant.temperature, 6.8), &mut nvs, &mut sink).unwrap();
        plant.step(heater_pin.is_high(), 1.0);
        if tick >= 150 * 60 {
            tail.push(plant.temperature);
        }
    }

    let mean = tail.iter().sum::<f32>() / tail.len() as f32;
    assert!((mean - 25.0).abs() < 1.0, "mean over last 30 min = {mean}");
    assert!(!svc.control_loop(LoopId::Heater).pid().is_emergency_stop());
    assert_eq!(
        sink.count(|e| matches!(e, AppEvent::EmergencyStop { .. })),
        0
    );
}

#[test]
fn missing_reading_holds_relay_off() {
    let (mut svc, heater_pin, _) = service();
    let mut nvs = MockNvs::new();
    let mut sink = RecordingSink::new();
    svc.start(&nvs).unwrap();

    // Far below target: full demand.
    for _ in 0..3 {
        svc.tick(&frame(10.0, 6.8), &mut nvs, &mut sink).unwrap();
    }
    assert!(heater_pin.is_high());

    let no_temp = SensorFrame {
        temperature: None,
        ..frame(10.0, 6.8)
    };
    // The toggle guard may defer the switch for up to 5 s.
    for _ in 0..6 {
        svc.tick(&no_temp, &mut nvs, &mut sink).unwrap();
    }
    assert!(!heater_pin.is_high());
    assert_eq!(svc.control_loop(LoopId::Heater).relay().duty(), 0.0);
}

#[test]
fn co2_demand_rises_when_ph_is_high() {
    let (mut svc, _, _) = service();
    let mut nvs = MockNvs::new();
    let mut sink = RecordingSink::new();
    svc.start(&nvs).unwrap();

    for _ in 0..3 {
        svc.tick(&frame(25.0, 7.6), &mut nvs, &mut sink).unwrap();
    }
    let co2 = svc.status(LoopId::Co2);
    assert!(co2.last_output > 0.0);
    assert!(co2.duty > 0.0);
    // Reverse acting: a positive error means pH is above target.
    assert!(co2.last_error > 0.0);

    // At target there is no proportional demand.
    let (mut svc, _, _) = service();
    svc.start(&nvs).unwrap();
    svc.tick(&frame(25.0, 6.8), &mut nvs, &mut sink).unwrap();
    assert_eq!(svc.status(LoopId::Co2).last_output, 0.0);
}

#[test]
fn status_is_emitted_on_interval() {
    let (mut svc, _, _) = service();
    let mut nvs = MockNvs::new();
    let mut sink = RecordingSink::new();
    svc.start(&nvs).unwrap();

    for _ in 0..60 {
        svc.tick(&frame(25.0, 6.8), &mut nvs, &mut sink).unwrap();
    }
    assert_eq!(svc.uptime_ms(), 60_000);
    let statuses: Vec<_> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            AppEvent::Status(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(statuses.len(), 4);
    assert_eq!(statuses[0].loop_id, LoopId::Heater);
    assert_eq!(statuses[1].loop_id, LoopId::Co2);
}

#[test]
fn invalid_commands_are_rejected() {
    let (mut svc, _, _) = service();
    let mut nvs = MockNvs::new();
    let mut sink = RecordingSink::new();
    svc.start(&nvs).unwrap();

    let err = svc
        .handle_command(
            AppCommand::SetTarget {
                loop_id: LoopId::Heater,
                target: f32::NAN,
            },
            &mut nvs,
            &mut sink,
        )
        .unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::ValidationFailed(_))));
    assert_eq!(svc.status(LoopId::Heater).target, 25.0);

    let err = svc
        .handle_command(
            AppCommand::StartAutoTune {
                loop_id: LoopId::Co2,
                amplitude: 0.0,
            },
            &mut nvs,
            &mut sink,
        )
        .unwrap_err();
    assert_eq!(err, Error::AutoTune(AutoTuneFailure::InvalidAmplitude));
    assert!(!svc.status(LoopId::Co2).auto_tuning);
}

#[test]
fn smooth_gain_change_completes_over_duration() {
    let (mut svc, _, _) = service();
    let mut nvs = MockNvs::new();
    let mut sink = RecordingSink::new();
    svc.start(&nvs).unwrap();

    let target = Gains::new(4.0, 1.0, 2.0);
    svc.handle_command(
        AppCommand::SetGainsSmooth {
            loop_id: LoopId::Heater,
            gains: target,
            duration_ms: Some(10_000),
        },
        &mut nvs,
        &mut sink,
    )
    .unwrap();

    svc.tick(&frame(25.0, 6.8), &mut nvs, &mut sink).unwrap();
    let mid = svc.status(LoopId::Heater);
    assert!(mid.in_transition);
    assert!(mid.gains.kp > 2.0 && mid.gains.kp < 4.0);

    for _ in 0..10 {
        svc.tick(&frame(25.0, 6.8), &mut nvs, &mut sink).unwrap();
    }
    let done = svc.status(LoopId::Heater);
    assert!(!done.in_transition);
    assert_eq!(done.gains, target);
    assert_eq!(
        sink.count(|e| matches!(
            e,
            AppEvent::GainsChanged {
                source: GainSource::Transition,
                ..
            }
        )),
        1
    );
}

#[test]
fn reset_keeps_gains_and_target() {
    let (mut svc, _, _) = service();
    let mut nvs = MockNvs::new();
    let mut sink = RecordingSink::new();
    svc.start(&nvs).unwrap();

    for _ in 0..5 {
        svc.tick(&frame(22.0, 6.8), &mut nvs, &mut sink).unwrap();
    }
    assert!(svc.status(LoopId::Heater).integral > 0.0);
    let gains = svc.status(LoopId::Heater).gains;

    svc.handle_command(AppCommand::Reset(LoopId::Heater), &mut nvs, &mut sink)
        .unwrap();
    let s = svc.status(LoopId::Heater);
    assert_eq!(s.integral, 0.0);
    assert_eq!(s.gains, gains);
    assert_eq!(s.target, 25.0);
}
