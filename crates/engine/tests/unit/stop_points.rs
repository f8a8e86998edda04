//! # Stop Point Tests
//!
//! Tests for the stop point registry: handle allocation, event
//! subscription, firing policy (ignore counts, conditions, one-shot
//! points), watches, stop-causing bookkeeping, and behaviour across reset.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use ttasim_core::Simulator;
use ttasim_core::common::{
    ClockCycleCount, InstructionAddress, SimError, SimValue, SimulationClock,
};
use ttasim_core::config::Config;
use ttasim_core::sim::stop_point::{EvaluationError, ExpressionEvaluator, StopPointKind};
use ttasim_core::sim::{
    Condition, EventBus, EventCode, SimulationStatus, StateView, StopPoint, StopPointHandle,
    StopPointManager, StopReason,
};

use crate::common::builder::machine::MachineBuilder;
use crate::common::builder::program::{loop_program, straight_line_program, watch_program};
use crate::common::harness::{TestContext, init_tracing};
use crate::common::mocks::evaluator::ScriptedEvaluator;

fn manager() -> (StopPointManager, EventBus) {
    let events = EventBus::new();
    (
        StopPointManager::new(events.clone(), SimulationClock::default()),
        events,
    )
}

// ══════════════════════════════════════════════════════════
// Registry
// ══════════════════════════════════════════════════════════

#[test]
fn test_add_stores_an_enabled_copy() {
    let (points, _) = manager();
    let mut original = StopPoint::breakpoint(4);
    original.set_enabled(false);

    let handle = points.add(&original).unwrap();
    original.set_ignore_count(7);

    let stored = points.stop_point_with_handle(handle).unwrap();
    assert!(stored.is_enabled());
    assert_eq!(stored.ignore_count(), 0);
    assert_eq!(stored.address(), Some(4));
}

#[test]
fn test_subscription_follows_point_count() {
    let (points, events) = manager();
    assert!(!points.is_subscribed());
    assert_eq!(events.listener_count(EventCode::NewInstruction), 0);

    let first = points.add(&StopPoint::breakpoint(1)).unwrap();
    let second = points.add(&StopPoint::watch("RF.1")).unwrap();
    assert!(points.is_subscribed());
    assert_eq!(events.listener_count(EventCode::NewInstruction), 1);

    points.delete(first).unwrap();
    assert!(points.is_subscribed());
    points.delete(second).unwrap();
    assert!(!points.is_subscribed());
    assert_eq!(events.listener_count(EventCode::NewInstruction), 0);
}

#[test]
fn test_unknown_handle_is_reported() {
    let (points, _) = manager();
    let handle = points.add(&StopPoint::breakpoint(1)).unwrap();
    points.delete(handle).unwrap();

    let err = points.delete(handle).unwrap_err();
    assert_eq!(
        err,
        SimError::InstanceNotFound {
            kind: "stop point",
            name: "#1".to_string(),
        }
    );
    assert!(points.set_ignore(handle, 1).is_err());
    assert!(points.enable(handle).is_err());
    assert!(points.stop_point_with_handle(handle).is_err());
}

#[test]
fn test_handles_by_index_are_ordered() {
    let (points, _) = manager();
    let a = points.add(&StopPoint::breakpoint(8)).unwrap();
    let b = points.add(&StopPoint::breakpoint(2)).unwrap();
    let c = points.add(&StopPoint::watch("RF.0")).unwrap();
    points.delete(b).unwrap();

    assert_eq!(points.stop_point_count(), 2);
    assert_eq!(points.stop_point_handle(0).unwrap(), a);
    assert_eq!(points.stop_point_handle(1).unwrap(), c);
    assert!(matches!(
        points.stop_point_handle(2),
        Err(SimError::OutOfRange { index: 2, count: 2, .. })
    ));
}

#[test]
fn test_enable_and_disable_all() {
    let (points, _) = manager();
    let a = points.add(&StopPoint::breakpoint(1)).unwrap();
    let b = points.add(&StopPoint::breakpoint(2)).unwrap();

    points.disable_all().unwrap();
    assert!(!points.stop_point_with_handle(a).unwrap().is_enabled());
    assert!(!points.stop_point_with_handle(b).unwrap().is_enabled());

    points.enable(b).unwrap();
    assert!(points.stop_point_with_handle(b).unwrap().is_enabled());

    points.enable_all().unwrap();
    assert!(points.stop_point_with_handle(a).unwrap().is_enabled());
}

#[test]
fn test_conditions_are_set_and_removed() {
    let (points, _) = manager();
    let handle = points.add(&StopPoint::breakpoint(1)).unwrap();

    points
        .set_condition(handle, Condition::new("RF.1"))
        .unwrap();
    let stored = points.stop_point_with_handle(handle).unwrap();
    assert_eq!(stored.condition().map(Condition::script), Some("RF.1"));

    points.remove_condition(handle).unwrap();
    assert!(points.stop_point_with_handle(handle).unwrap().condition().is_none());
}

#[test]
fn test_description() {
    let mut point = StopPoint::breakpoint(16);
    point.set_condition(Condition::new("RF.1"));
    point.set_ignore_count(2);
    point.set_enabled(false);
    assert_eq!(
        point.description(),
        "breakpoint at 0x10 if RF.1, ignoring next 2 hits (disabled)"
    );

    assert_eq!(StopPoint::watch("bus:B1").to_string(), "watch 'bus:B1'");

    let (points, _) = manager();
    let handle = points.add(&point).unwrap();
    assert_eq!(handle.value(), 1);
    assert_eq!(handle.to_string(), "#1");
}

proptest! {
    #[test]
    fn test_handles_are_never_reused(ops in prop::collection::vec(any::<bool>(), 1..40)) {
        let (points, _) = manager();
        let mut live: Vec<StopPointHandle> = Vec::new();
        let mut seen: Vec<StopPointHandle> = Vec::new();
        for add in ops {
            if add || live.is_empty() {
                let handle = points.add(&StopPoint::breakpoint(0)).unwrap();
                prop_assert!(seen.iter().all(|h| *h < handle));
                seen.push(handle);
                live.push(handle);
            } else if let Some(handle) = live.pop() {
                prop_assert!(points.delete(handle).is_ok());
            }
        }
        prop_assert_eq!(points.stop_point_count(), live.len());
    }
}

// ══════════════════════════════════════════════════════════
// Firing policy
// ══════════════════════════════════════════════════════════

#[test]
fn test_breakpoint_stops_before_the_instruction() {
    let mut ctx = TestContext::new(&straight_line_program(5));
    let handle = ctx.sim.stop_points().add(&StopPoint::breakpoint(2)).unwrap();

    ctx.run();

    {
        let controller = ctx.controller();
        assert_eq!(controller.status(), SimulationStatus::Stopped);
        assert_eq!(controller.stop_reasons(), &[StopReason::Breakpoint]);
        assert_eq!(controller.program_counter(), 2);
        assert_eq!(controller.cycle_count(), 2);
        assert_eq!(controller.last_executed_instruction(), Some(1));
    }
    let points = ctx.sim.stop_points();
    assert_eq!(points.stop_causing_stop_point_count(), 1);
    assert_eq!(points.stop_causing_stop_point(0).unwrap(), handle);
    assert!(points.stop_causing_stop_point(1).is_err());

    ctx.run();

    assert_eq!(ctx.controller().status(), SimulationStatus::Finished);
    assert_eq!(ctx.sim.stop_points().stop_causing_stop_point_count(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_ignore_count_skips_hits(ignore in 0u32..4) {
        let mut ctx = TestContext::new(&loop_program());
        let points = ctx.sim.stop_points().clone();
        let handle = points.add(&StopPoint::breakpoint(0)).unwrap();
        points.set_ignore(handle, ignore).unwrap();

        ctx.run();

        prop_assert_eq!(ctx.controller().cycle_count(), 2 * (u64::from(ignore) + 1));
        prop_assert_eq!(points.stop_point_with_handle(handle).unwrap().ignore_count(), 0);
    }
}

#[test]
fn test_disabled_point_does_not_fire() {
    let mut ctx = TestContext::new(&straight_line_program(4));
    let points = ctx.sim.stop_points().clone();
    let handle = points.add(&StopPoint::breakpoint(2)).unwrap();
    points.disable(handle).unwrap();

    ctx.run();

    assert_eq!(ctx.controller().status(), SimulationStatus::Finished);
}

#[test]
fn test_condition_is_evaluated_on_each_hit() {
    init_tracing();
    let (evaluator, log) = ScriptedEvaluator::new(&[0, 0, 1]);
    let mut sim = Simulator::with_evaluator(Config::default(), Box::new(evaluator));
    sim.load(&MachineBuilder::standard().build(), &loop_program())
        .unwrap();
    let handle = sim.stop_points().add(&StopPoint::breakpoint(0)).unwrap();
    sim.stop_points()
        .set_condition(handle, Condition::new("RF.0 == 0"))
        .unwrap();

    sim.run().unwrap();

    assert_eq!(sim.controller().unwrap().cycle_count(), 6);
    assert_eq!(log.borrow().len(), 3);
    assert!(log.borrow().iter().all(|e| e == "RF.0 == 0"));
}

#[test]
fn test_failing_condition_counts_as_false() {
    let mut ctx = TestContext::new(&straight_line_program(4));
    let points = ctx.sim.stop_points().clone();
    let handle = points.add(&StopPoint::breakpoint(2)).unwrap();
    points
        .set_condition(handle, Condition::new("no such name"))
        .unwrap();

    ctx.run();

    assert_eq!(ctx.controller().status(), SimulationStatus::Finished);
}

#[test]
fn test_condition_reads_machine_state() {
    let mut ctx = TestContext::new(&watch_program());
    let points = ctx.sim.stop_points().clone();
    let handle = points.add(&StopPoint::breakpoint(1)).unwrap();
    points.set_condition(handle, Condition::new("RF.1")).unwrap();

    ctx.run();

    assert_eq!(ctx.controller().program_counter(), 1);
    assert_eq!(ctx.reg(1), 1);
}

#[test]
fn test_enable_once_and_delete() {
    let mut ctx = TestContext::new(&straight_line_program(5));
    let points = ctx.sim.stop_points().clone();
    let handle = points.add(&StopPoint::breakpoint(2)).unwrap();
    points.disable(handle).unwrap();
    points.enable_once_and_delete(handle).unwrap();

    ctx.run();

    assert_eq!(ctx.controller().program_counter(), 2);
    assert_eq!(points.stop_point_count(), 0);
    assert!(!points.is_subscribed());
    assert_eq!(points.stop_causing_stop_point_count(), 1);
}

#[test]
fn test_enable_once_and_disable() {
    let mut ctx = TestContext::new(&straight_line_program(5));
    let points = ctx.sim.stop_points().clone();
    let handle = points.add(&StopPoint::breakpoint(2)).unwrap();
    points.enable_once_and_disable(handle).unwrap();

    ctx.run();
    assert_eq!(ctx.controller().program_counter(), 2);
    assert!(!points.stop_point_with_handle(handle).unwrap().is_enabled());

    ctx.run();
    assert_eq!(ctx.controller().status(), SimulationStatus::Finished);
    assert_eq!(points.stop_point_count(), 1);
}

#[test]
fn test_simultaneous_points_are_all_reported() {
    let mut ctx = TestContext::new(&straight_line_program(5));
    let points = ctx.sim.stop_points().clone();
    let first = points.add(&StopPoint::breakpoint(3)).unwrap();
    let second = points.add(&StopPoint::breakpoint(3)).unwrap();

    ctx.run();

    assert_eq!(ctx.controller().stop_reasons(), &[StopReason::Breakpoint]);
    assert_eq!(points.stop_causing_stop_point_count(), 2);
    assert_eq!(points.stop_causing_stop_point(0).unwrap(), first);
    assert_eq!(points.stop_causing_stop_point(1).unwrap(), second);
}

// ══════════════════════════════════════════════════════════
// Watches
// ══════════════════════════════════════════════════════════

#[test]
fn test_watch_stops_on_value_change() {
    let mut ctx = TestContext::new(&watch_program());
    let points = ctx.sim.stop_points().clone();
    let handle = points.add(&StopPoint::watch("RF.1")).unwrap();

    ctx.run();

    let controller = ctx.controller();
    assert_eq!(controller.stop_reasons(), &[StopReason::Breakpoint]);
    assert_eq!(controller.cycle_count(), 3);
    assert_eq!(controller.program_counter(), 3);

    let stored = points.stop_point_with_handle(handle).unwrap();
    let StopPointKind::Watch(watch) = stored.kind() else {
        panic!("expected a watch, got {stored:?}");
    };
    assert_eq!(watch.expression(), "RF.1");
    assert_eq!(watch.previous_value(), Some(SimValue::new(2, 32)));
}

#[test]
fn test_unchanged_watch_never_fires() {
    let mut ctx = TestContext::new(&straight_line_program(6));
    let _ = ctx.sim.stop_points().add(&StopPoint::watch("RF.7")).unwrap();

    ctx.run();

    assert_eq!(ctx.controller().status(), SimulationStatus::Finished);
}

#[test]
fn test_watch_evaluates_once_per_cycle() {
    struct FrozenView(ClockCycleCount);

    impl StateView for FrozenView {
        fn program_counter(&self) -> InstructionAddress {
            0
        }

        fn cycle_count(&self) -> ClockCycleCount {
            self.0
        }

        fn value_of(&self, _name: &str) -> Option<SimValue> {
            None
        }
    }

    let (mut evaluator, log) = ScriptedEvaluator::new(&[1, 2]);
    let mut point = StopPoint::watch("RF.1");

    let view = FrozenView(4);
    assert!(!point.is_triggered(&view, &mut evaluator));
    assert!(!point.is_triggered(&view, &mut evaluator));
    assert_eq!(log.borrow().len(), 1);

    // The script is exhausted now; a second evaluation would fail and read as unchanged.
    let view = FrozenView(5);
    assert!(point.is_triggered(&view, &mut evaluator));
    assert!(point.is_triggered(&view, &mut evaluator));
    assert_eq!(log.borrow().len(), 2);
}

#[test]
fn test_watch_is_evaluated_once_per_new_instruction() {
    init_tracing();
    let (evaluator, log) = ScriptedEvaluator::new(&[3; 16]);
    let mut sim = Simulator::with_evaluator(Config::default(), Box::new(evaluator));
    sim.load(&MachineBuilder::standard().build(), &straight_line_program(4))
        .unwrap();
    let _ = sim.stop_points().add(&StopPoint::watch("RF.1")).unwrap();

    sim.run().unwrap();

    assert_eq!(sim.controller().unwrap().status(), SimulationStatus::Finished);
    assert_eq!(log.borrow().len(), 4);
}

// ══════════════════════════════════════════════════════════
// Reset
// ══════════════════════════════════════════════════════════

#[test]
fn test_reset_forgets_stop_causing_points() {
    let mut ctx = TestContext::new(&straight_line_program(6));
    let points = ctx.sim.stop_points().clone();
    let handle = points.add(&StopPoint::breakpoint(2)).unwrap();
    ctx.run();
    assert_eq!(points.stop_causing_stop_point_count(), 1);

    points.delete(handle).unwrap();
    ctx.sim.reset().unwrap();
    assert_eq!(points.stop_causing_stop_point_count(), 0);
    ctx.step(2);

    assert_eq!(ctx.controller().cycle_count(), 2);
    assert_eq!(points.stop_causing_stop_point_count(), 0);
    assert!(matches!(
        points.stop_causing_stop_point(0),
        Err(SimError::OutOfRange { index: 0, count: 0, .. })
    ));
}

#[test]
fn test_controller_reset_expires_stop_record() {
    let mut ctx = TestContext::new(&straight_line_program(6));
    let points = ctx.sim.stop_points().clone();
    let handle = points.add(&StopPoint::breakpoint(2)).unwrap();
    ctx.run();
    points.delete(handle).unwrap();

    ctx.controller_mut().reset();
    ctx.step(2);

    assert_eq!(ctx.controller().clock().epoch(), 2);
    assert_eq!(points.stop_causing_stop_point_count(), 0);
}

#[test]
fn test_watch_baseline_restarts_after_reset() {
    let mut ctx = TestContext::new(&watch_program());
    let points = ctx.sim.stop_points().clone();
    let handle = points.add(&StopPoint::watch("RF.1")).unwrap();
    ctx.run();
    assert_eq!(ctx.controller().cycle_count(), 3);

    ctx.sim.reset().unwrap();
    let stored = points.stop_point_with_handle(handle).unwrap();
    let StopPointKind::Watch(watch) = stored.kind() else {
        panic!("expected a watch, got {stored:?}");
    };
    assert_eq!(watch.previous_value(), None);

    ctx.run();

    let controller = ctx.controller();
    assert_eq!(controller.stop_reasons(), &[StopReason::Breakpoint]);
    assert_eq!(controller.cycle_count(), 3);
    assert_eq!(points.stop_causing_stop_point(0).unwrap(), handle);
}

// ══════════════════════════════════════════════════════════
// Re-entrancy
// ══════════════════════════════════════════════════════════

type ReentryLog = Rc<RefCell<Vec<SimError>>>;

/// Evaluator that tries to change the stop points it is evaluating.
struct MeddlingEvaluator {
    points: Rc<RefCell<Option<StopPointManager>>>,
    errors: ReentryLog,
}

impl ExpressionEvaluator for MeddlingEvaluator {
    fn evaluate(
        &mut self,
        expression: &str,
        view: &dyn StateView,
    ) -> Result<SimValue, EvaluationError> {
        if let Some(points) = self.points.borrow().as_ref() {
            let mut errors = self.errors.borrow_mut();
            errors.extend(points.add(&StopPoint::breakpoint(0)).err());
            errors.extend(points.disable_all().err());
            errors.extend(points.rewind().err());
        }
        view.value_of(expression)
            .ok_or_else(|| EvaluationError::new(expression, "unknown name"))
    }
}

#[test]
fn test_changing_points_during_a_sweep_fails_cleanly() {
    init_tracing();
    let slot = Rc::new(RefCell::new(None));
    let errors = ReentryLog::default();
    let evaluator = MeddlingEvaluator {
        points: Rc::clone(&slot),
        errors: Rc::clone(&errors),
    };
    let mut sim = Simulator::with_evaluator(Config::default(), Box::new(evaluator));
    sim.load(&MachineBuilder::standard().build(), &watch_program())
        .unwrap();
    *slot.borrow_mut() = Some(sim.stop_points().clone());
    let handle = sim.stop_points().add(&StopPoint::watch("RF.1")).unwrap();

    sim.run().unwrap();

    assert_eq!(sim.controller().unwrap().cycle_count(), 3);
    assert_eq!(sim.stop_points().stop_point_count(), 1);
    assert_eq!(sim.stop_points().stop_causing_stop_point(0).unwrap(), handle);
    assert!(sim.stop_points().stop_point_with_handle(handle).unwrap().is_enabled());
    let errors = errors.borrow();
    assert_eq!(errors.len(), 9);
    assert!(
        errors
            .iter()
            .all(|e| matches!(e, SimError::SimulationExecution(_)))
    );
    drop(errors);
    let _ = slot.borrow_mut().take();
}
