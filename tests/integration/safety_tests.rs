//! Safety interlock behaviour through the full service path.

use tankctl::app::commands::AppCommand;
use tankctl::app::events::AppEvent;
use tankctl::app::service::ControlService;
use tankctl::config::{LoopId, SystemConfig};
use tankctl::error::{AutoTuneFailure, Error, SafetyFault};

use crate::mock_hw::{MockNvs, MockPin, RecordingSink, frame};

struct Rig {
    svc: ControlService<'static, MockPin>,
    heater: MockPin,
    co2: MockPin,
    nvs: MockNvs,
    sink: RecordingSink,
}

impl Rig {
    fn new() -> Self {
        let heater = MockPin::new();
        let co2 = MockPin::new();
        let mut svc = ControlService::new(SystemConfig::default(), heater.clone(), co2.clone());
        let nvs = MockNvs::new();
        svc.start(&nvs).unwrap();
        Self {
            svc,
            heater,
            co2,
            nvs,
            sink: RecordingSink::new(),
        }
    }

    fn tick(&mut self, temperature: f32, ph: f32) {
        self.svc
            .tick(&frame(temperature, ph), &mut self.nvs, &mut self.sink)
            .unwrap();
    }

    fn command(&mut self, cmd: AppCommand) -> Result<(), Error> {
        self.svc.handle_command(cmd, &mut self.nvs, &mut self.sink)
    }
}

#[test]
fn over_temperature_forces_relay_off_immediately() {
    let mut rig = Rig::new();
    rig.tick(15.0, 6.8);
    assert!(rig.heater.is_high(), "cold tank should energise the heater");

    // One second later; the toggle guard would normally hold the relay on.
    rig.tick(31.0, 6.8);
    assert!(!rig.heater.is_high());
    let heater = rig.svc.control_loop(LoopId::Heater);
    assert!(heater.pid().is_emergency_stop());
    assert!(heater.relay().is_disabled());
    assert_eq!(heater.pid().last_output(), 0.0);

    let stops: Vec<_> = rig
        .sink
        .events
        .iter()
        .filter_map(|e| match e {
            AppEvent::EmergencyStop {
                loop_id,
                measured,
                limit,
            } => Some((*loop_id, *measured, *limit)),
            _ => None,
        })
        .collect();
    assert_eq!(stops, vec![(LoopId::Heater, 31.0, 30.0)]);
    assert!(!rig.svc.status(LoopId::Co2).emergency_stop);
}

#[test]
fn latch_holds_until_cleared() {
    let mut rig = Rig::new();
    rig.tick(31.0, 6.8);
    for _ in 0..20 {
        rig.tick(20.0, 6.8);
    }
    assert!(rig.svc.status(LoopId::Heater).emergency_stop);
    assert!(!rig.heater.is_high());
    // The trip is reported once, not every cycle.
    assert_eq!(
        rig.sink
            .count(|e| matches!(e, AppEvent::EmergencyStop { .. })),
        1
    );

    rig.command(AppCommand::ClearEmergencyStop(LoopId::Heater))
        .unwrap();
    assert!(
        rig.sink
            .events
            .contains(&AppEvent::EmergencyCleared(LoopId::Heater))
    );
    let status = rig.svc.status(LoopId::Heater);
    assert!(!status.emergency_stop);
    assert_eq!(status.integral, 0.0);

    // Demand resumes; the relay switches on at the next window start.
    for _ in 0..10 {
        rig.tick(15.0, 6.8);
    }
    assert!(rig.heater.is_high());
}

#[test]
fn low_ph_trips_co2_loop_only() {
    let mut rig = Rig::new();
    // Reverse acting: the limit is target - margin = 6.0.
    rig.tick(25.0, 6.1);
    assert!(!rig.svc.status(LoopId::Co2).emergency_stop);
    rig.tick(25.0, 5.9);
    assert!(rig.svc.status(LoopId::Co2).emergency_stop);
    assert!(!rig.co2.is_high());
    assert!(!rig.svc.status(LoopId::Heater).emergency_stop);
    assert!((rig.svc.control_loop(LoopId::Co2).pid().safety_limit() - 6.0).abs() < 1e-5);
}

#[test]
fn emergency_stop_aborts_autotune() {
    let mut rig = Rig::new();
    rig.command(AppCommand::StartAutoTune {
        loop_id: LoopId::Heater,
        amplitude: 50.0,
    })
    .unwrap();
    rig.tick(24.0, 6.8);
    assert!(rig.svc.status(LoopId::Heater).auto_tuning);
    assert_eq!(rig.svc.status(LoopId::Heater).last_output, 50.0);

    rig.tick(30.5, 6.8);
    assert!(!rig.svc.status(LoopId::Heater).auto_tuning);
    assert!(rig.sink.events.contains(&AppEvent::AutoTuneFailed {
        loop_id: LoopId::Heater,
        reason: AutoTuneFailure::Aborted,
    }));

    // No tuning while latched.
    let err = rig
        .command(AppCommand::StartAutoTune {
            loop_id: LoopId::Heater,
            amplitude: 50.0,
        })
        .unwrap_err();
    assert_eq!(err, Error::Safety(SafetyFault::Latched));
}
