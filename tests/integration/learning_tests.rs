//! Control cycle ↔ adaptation worker round trips over an `AdaptationLink`.

use tankctl::app::commands::AppCommand;
use tankctl::app::events::{AppEvent, GainSource};
use tankctl::app::service::ControlService;
use tankctl::config::{LoopId, SystemConfig};
use tankctl::control::gains::Gains;
use tankctl::learning::context::{BucketWidths, Season};
use tankctl::learning::store::{GainLookupStore, PerformanceSample};
use tankctl::learning::worker::{AdaptationLink, AdaptationWorker};

use crate::mock_hw::{MockNvs, MockPin, RecordingSink, frame};

fn perfect_sample(gains: Gains) -> PerformanceSample {
    PerformanceSample {
        timestamp_ms: 0,
        value: 25.0,
        target: 25.0,
        ambient: 20.0,
        hour: 0,
        season: Season::default(),
        tank_volume: 0.0,
        gains,
        error_mean: 0.0,
        error_variance: 0.0,
        settling_time_s: 0.0,
        overshoot: 0.0,
        steady_state_error: 0.0,
        average_output: 20.0,
        sample_count: 300,
        score: 0.0,
    }
}

#[test]
fn closed_windows_reach_the_store() {
    let heater_link = AdaptationLink::new();
    let co2_link = AdaptationLink::new();
    let mut svc = ControlService::new(SystemConfig::default(), MockPin::new(), MockPin::new())
        .with_links(&heater_link, &co2_link);
    let mut nvs = MockNvs::new();
    let mut sink = RecordingSink::new();
    svc.start(&nvs).unwrap();

    let mut worker = AdaptationWorker::new(
        &heater_link,
        GainLookupStore::new(LoopId::Heater.ml_namespace(), BucketWidths::default()),
        MockNvs::new(),
    );

    // First cycle misses the empty cache and posts a lookup.
    svc.tick(&frame(25.0, 6.8), &mut nvs, &mut sink).unwrap();
    assert_eq!(worker.service_pending(), 1);
    assert!(heater_link.take_result().is_none(), "empty store has nothing to offer");

    // A five-minute performance window closes and is handed over.
    for _ in 0..300 {
        svc.tick(&frame(25.0, 6.8), &mut nvs, &mut sink).unwrap();
    }
    worker.service_pending();
    assert_eq!(worker.store().total_samples(), 1);
    assert_eq!(worker.store().len(), 1);
}

#[test]
fn confident_recommendation_is_blended_in() {
    let heater_link = AdaptationLink::new();
    let co2_link = AdaptationLink::new();
    let mut svc = ControlService::new(SystemConfig::default(), MockPin::new(), MockPin::new())
        .with_links(&heater_link, &co2_link);
    let mut nvs = MockNvs::new();
    let mut sink = RecordingSink::new();
    svc.start(&nvs).unwrap();

    let learned = Gains::new(4.0, 1.0, 2.0);
    let mut store = GainLookupStore::new(LoopId::Heater.ml_namespace(), BucketWidths::default());
    for _ in 0..20 {
        store.log_sample(perfect_sample(learned));
    }
    let mut worker = AdaptationWorker::new(&heater_link, store, MockNvs::new());

    svc.tick(&frame(25.0, 6.8), &mut nvs, &mut sink).unwrap();
    assert_eq!(worker.service_pending(), 1);

    // The result is picked up at the start of the next cycle.
    svc.tick(&frame(25.0, 6.8), &mut nvs, &mut sink).unwrap();
    let status = svc.status(LoopId::Heater);
    // Default gains (2.0, 0.5, 1.0) moved 70 % toward the learned ones.
    assert!((status.gains.kp - 3.4).abs() < 1e-4);
    assert!((status.gains.ki - 0.85).abs() < 1e-4);
    assert!((status.gains.kd - 1.7).abs() < 1e-4);
    assert!(status.ml_confidence > 0.7);
    assert!(sink.events.iter().any(|e| matches!(
        e,
        AppEvent::GainsChanged {
            loop_id: LoopId::Heater,
            source: GainSource::Learning,
            ..
        }
    )));
    assert!(nvs.contains("heater_pid", "gains"));
}

#[test]
fn disabling_learning_stops_requests() {
    let heater_link = AdaptationLink::new();
    let co2_link = AdaptationLink::new();
    let mut svc = ControlService::new(SystemConfig::default(), MockPin::new(), MockPin::new())
        .with_links(&heater_link, &co2_link);
    let mut nvs = MockNvs::new();
    let mut sink = RecordingSink::new();
    svc.start(&nvs).unwrap();

    svc.handle_command(
        AppCommand::SetLearning {
            loop_id: LoopId::Heater,
            enabled: false,
        },
        &mut nvs,
        &mut sink,
    )
    .unwrap();
    assert!(!heater_link.is_enabled());
    assert!(co2_link.is_enabled());

    let mut worker = AdaptationWorker::new(
        &heater_link,
        GainLookupStore::new(LoopId::Heater.ml_namespace(), BucketWidths::default()),
        MockNvs::new(),
    );
    for _ in 0..5 {
        svc.tick(&frame(25.0, 6.8), &mut nvs, &mut sink).unwrap();
    }
    assert_eq!(worker.service_pending(), 0);
    assert!(!svc.control_loop(LoopId::Heater).pid().is_learning_enabled());
}
