//! Bumpless gain transfer.
//!
//! A smooth set records where the gains start, where they should end up
//! and how long the move takes.  Each control cycle asks for the gains at
//! the current time; once the duration has elapsed the plan snaps to its
//! target and clears itself.  A new plan replaces any in-flight one.

use serde::Serialize;

use super::gains::Gains;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransitionPlan {
    pub start: Gains,
    pub target: Gains,
    pub start_ms: u64,
    pub duration_ms: u32,
}

/// Result of advancing a transition to the current time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionStep {
    /// No transition in progress.
    Idle,
    /// Still moving; apply these gains.
    Interpolating(Gains),
    /// Reached the target on this step; the plan has been cleared.
    Finished(Gains),
}

#[derive(Default)]
pub struct ParameterTransition {
    plan: Option<TransitionPlan>,
}

impl ParameterTransition {
    pub const fn new() -> Self {
        Self { plan: None }
    }

    pub fn begin(&mut self, start: Gains, target: Gains, now_ms: u64, duration_ms: u32) {
        self.plan = Some(TransitionPlan {
            start,
            target,
            start_ms: now_ms,
            duration_ms,
        });
    }

    pub fn cancel(&mut self) {
        self.plan = None;
    }

    pub fn is_active(&self) -> bool {
        self.plan.is_some()
    }

    pub fn plan(&self) -> Option<&TransitionPlan> {
        self.plan.as_ref()
    }

    pub fn step(&mut self, now_ms: u64) -> TransitionStep {
        let Some(plan) = self.plan else {
            return TransitionStep::Idle;
        };
        let elapsed = now_ms.saturating_sub(plan.start_ms);
        if elapsed >= u64::from(plan.duration_ms) {
            self.plan = None;
            return TransitionStep::Finished(plan.target);
        }
        let t = elapsed as f32 / plan.duration_ms as f32;
        TransitionStep::Interpolating(plan.start.lerp(plan.target, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: Gains = Gains::new(1.0, 0.1, 0.5);
    const TARGET: Gains = Gains::new(3.0, 0.5, 1.5);

    #[test]
    fn midpoint_at_half_duration() {
        let mut t = ParameterTransition::new();
        t.begin(START, TARGET, 1_000, 1_000);
        match t.step(1_500) {
            TransitionStep::Interpolating(g) => {
                assert!((g.kp - 2.0).abs() < 1e-5);
                assert!((g.ki - 0.3).abs() < 1e-5);
                assert!((g.kd - 1.0).abs() < 1e-5);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(t.is_active());
    }

    #[test]
    fn snaps_to_target_and_clears() {
        let mut t = ParameterTransition::new();
        t.begin(START, TARGET, 0, 1_000);
        assert_eq!(t.step(1_000), TransitionStep::Finished(TARGET));
        assert!(!t.is_active());
        assert_eq!(t.step(1_100), TransitionStep::Idle);
    }

    #[test]
    fn zero_duration_finishes_immediately() {
        let mut t = ParameterTransition::new();
        t.begin(START, TARGET, 10, 0);
        assert_eq!(t.step(10), TransitionStep::Finished(TARGET));
    }

    #[test]
    fn new_plan_replaces_old() {
        let mut t = ParameterTransition::new();
        t.begin(START, TARGET, 0, 1_000);
        let other = Gains::new(5.0, 1.0, 2.0);
        t.begin(START, other, 0, 1_000);
        assert_eq!(t.step(2_000), TransitionStep::Finished(other));
    }
}
