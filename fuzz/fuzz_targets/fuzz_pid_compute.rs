//! Fuzz target: `PidController::compute`
//!
//! Interprets the input as a stream of (measurement, dt) pairs of raw
//! `f32` bits, so NaN, infinities and subnormals all show up, and
//! verifies:
//! - No panics
//! - The output is finite and inside the output range
//! - The output is exactly zero while the interlock is latched
//!
//! cargo fuzz run fuzz_pid_compute

#![no_main]

use libfuzzer_sys::fuzz_target;
use tankctl::config::{LearningConfig, LoopConfig, LoopId};
use tankctl::control::gains::GainBounds;
use tankctl::control::pid::PidController;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let (id, cfg) = if selector & 1 == 0 {
        (LoopId::Heater, LoopConfig::heater())
    } else {
        (LoopId::Co2, LoopConfig::co2())
    };
    let mut pid = PidController::new(id, &cfg, GainBounds::default(), &LearningConfig::default());
    if selector & 2 != 0 {
        let _ = pid.start_autotune(40.0);
    }

    for chunk in rest.chunks_exact(8) {
        let input = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let dt = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        let out = pid.compute(input, dt);
        assert!(out.is_finite(), "non-finite output {out}");
        if pid.is_emergency_stop() {
            assert_eq!(out, 0.0);
        } else {
            assert!(out >= cfg.output_min && out <= cfg.output_max, "out of range {out}");
        }
        while pid.take_event().is_some() {}
    }
});
