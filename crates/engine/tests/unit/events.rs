//! # Event Bus Tests
//!
//! Tests for listener registration, delivery, stop requests raised from
//! listeners, registration changes made during dispatch, and the ordering
//! of events during a run.

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use ttasim_core::common::{ClockCycleCount, InstructionAddress, RuntimeErrorKind, SimValue};
use ttasim_core::memory::AccessKind;
use ttasim_core::sim::events::{EventContext, SharedListener};
use ttasim_core::sim::{
    EventBus, EventCode, Listener, SimulationEvent, StateView, StopReason,
};

use crate::common::builder::program::{
    add_program, division_by_zero_program, memory_program, straight_line_program,
};
use crate::common::harness::TestContext;
use crate::common::mocks::listener::{ALL_EVENTS, Recorded, RecordingListener};

struct FixedView {
    pc: InstructionAddress,
    cycle: ClockCycleCount,
}

impl StateView for FixedView {
    fn program_counter(&self) -> InstructionAddress {
        self.pc
    }

    fn cycle_count(&self) -> ClockCycleCount {
        self.cycle
    }

    fn value_of(&self, _name: &str) -> Option<SimValue> {
        None
    }
}

fn deliver(bus: &EventBus, event: &SimulationEvent<'_>) -> Vec<StopReason> {
    let view = FixedView { pc: 0, cycle: 0 };
    let mut ctx = EventContext::new(&view);
    bus.handle_event(event, &mut ctx);
    ctx.into_stop_requests()
}

#[test]
fn test_listener_receives_only_registered_codes() {
    let bus = EventBus::new();
    let recorder = RecordingListener::attach(&bus, &[EventCode::CycleEnd]);

    let _ = deliver(&bus, &SimulationEvent::NewInstruction { address: 4 });
    let _ = deliver(&bus, &SimulationEvent::CycleEnd { cycle: 9 });

    assert_eq!(recorder.borrow().events, vec![Recorded::CycleEnd(9)]);
}

#[test]
fn test_register_and_unregister() {
    let bus = EventBus::new();
    let recorder = RecordingListener::attach(&bus, &[EventCode::NewInstruction]);
    let shared: SharedListener = recorder.clone();

    assert_eq!(bus.listener_count(EventCode::NewInstruction), 1);
    assert!(bus.is_registered(EventCode::NewInstruction, &shared));
    assert!(!bus.is_registered(EventCode::CycleEnd, &shared));

    assert!(bus.unregister_listener(EventCode::NewInstruction, &shared));
    assert!(!bus.unregister_listener(EventCode::NewInstruction, &shared));
    assert_eq!(bus.listener_count(EventCode::NewInstruction), 0);

    let _ = deliver(&bus, &SimulationEvent::NewInstruction { address: 1 });
    assert!(recorder.borrow().events.is_empty());
}

#[test]
fn test_duplicate_registrations_need_matching_unregistrations() {
    let bus = EventBus::new();
    let recorder = RecordingListener::attach(&bus, &[EventCode::CycleEnd, EventCode::CycleEnd]);
    let shared: SharedListener = recorder.clone();
    assert_eq!(bus.listener_count(EventCode::CycleEnd), 2);

    let _ = deliver(&bus, &SimulationEvent::CycleEnd { cycle: 1 });
    assert_eq!(recorder.borrow().cycle_ends(), vec![1, 1]);

    assert!(bus.unregister_listener(EventCode::CycleEnd, &shared));
    assert!(bus.is_registered(EventCode::CycleEnd, &shared));
    assert_eq!(bus.listener_count(EventCode::CycleEnd), 1);
    let _ = deliver(&bus, &SimulationEvent::CycleEnd { cycle: 2 });
    assert_eq!(recorder.borrow().cycle_ends(), vec![1, 1, 2]);

    assert!(bus.unregister_listener(EventCode::CycleEnd, &shared));
    assert!(!bus.is_registered(EventCode::CycleEnd, &shared));
    assert!(!bus.unregister_listener(EventCode::CycleEnd, &shared));
    let _ = deliver(&bus, &SimulationEvent::CycleEnd { cycle: 3 });
    assert_eq!(recorder.borrow().cycle_ends(), vec![1, 1, 2]);
}

/// Listener that changes the bus registrations the first time it is called.
struct RegistrationChanger {
    bus: EventBus,
    remove: Option<SharedListener>,
    add: Option<SharedListener>,
}

impl Listener for RegistrationChanger {
    fn handle_event(&mut self, event: &SimulationEvent<'_>, _ctx: &mut EventContext<'_>) {
        let code = event.code();
        if let Some(listener) = self.remove.take() {
            assert!(self.bus.unregister_listener(code, &listener));
        }
        if let Some(listener) = self.add.take() {
            self.bus.register_listener(code, listener);
        }
    }
}

#[test]
fn test_unregistering_during_dispatch_takes_effect_next_event() {
    let bus = EventBus::new();
    let victim = RecordingListener::attach(&bus, &[EventCode::NewInstruction]);
    let shared_victim: SharedListener = victim.clone();
    bus.register_listener(
        EventCode::NewInstruction,
        Rc::new(RefCell::new(RegistrationChanger {
            bus: bus.clone(),
            remove: Some(shared_victim.clone()),
            add: None,
        })),
    );
    bus.register_listener(EventCode::NewInstruction, shared_victim.clone());

    let _ = deliver(&bus, &SimulationEvent::NewInstruction { address: 1 });
    assert_eq!(victim.borrow().new_instructions(), vec![1, 1]);
    assert_eq!(bus.listener_count(EventCode::NewInstruction), 2);

    let _ = deliver(&bus, &SimulationEvent::NewInstruction { address: 2 });
    assert_eq!(victim.borrow().new_instructions(), vec![1, 1, 2]);
    assert!(bus.is_registered(EventCode::NewInstruction, &shared_victim));
}

#[test]
fn test_registering_during_dispatch_takes_effect_next_event() {
    let bus = EventBus::new();
    let newcomer = Rc::new(RefCell::new(RecordingListener::default()));
    let shared_newcomer: SharedListener = newcomer.clone();
    bus.register_listener(
        EventCode::CycleEnd,
        Rc::new(RefCell::new(RegistrationChanger {
            bus: bus.clone(),
            remove: None,
            add: Some(shared_newcomer),
        })),
    );

    let _ = deliver(&bus, &SimulationEvent::CycleEnd { cycle: 0 });
    assert!(newcomer.borrow().events.is_empty());

    let _ = deliver(&bus, &SimulationEvent::CycleEnd { cycle: 1 });
    assert_eq!(newcomer.borrow().cycle_ends(), vec![1]);
}

#[test]
fn test_clones_share_registrations() {
    let bus = EventBus::new();
    let other = bus.clone();
    let recorder = RecordingListener::attach(&other, &[EventCode::CycleEnd]);

    let _ = deliver(&bus, &SimulationEvent::CycleEnd { cycle: 2 });

    assert_eq!(recorder.borrow().cycle_ends(), vec![2]);
}

#[test]
fn test_listeners_run_in_registration_order_and_collect_stop_requests() {
    let bus = EventBus::new();
    let first = RecordingListener::attach(&bus, &[EventCode::NewInstruction]);
    let second = RecordingListener::attach(&bus, &[EventCode::NewInstruction]);
    first.borrow_mut().stop_at = Some((8, StopReason::UserRequested));
    second.borrow_mut().stop_at = Some((8, StopReason::Breakpoint));

    let requests = deliver(&bus, &SimulationEvent::NewInstruction { address: 8 });

    assert_eq!(
        requests,
        vec![StopReason::UserRequested, StopReason::Breakpoint]
    );
    assert_eq!(first.borrow().new_instructions(), vec![8]);
    assert_eq!(second.borrow().new_instructions(), vec![8]);
}

#[test]
fn test_run_event_sequence() {
    let mut ctx = TestContext::new(&add_program());
    let recorder = RecordingListener::attach(ctx.sim.events(), ALL_EVENTS);

    ctx.run();

    assert_eq!(
        recorder.borrow().events,
        vec![
            Recorded::CycleEnd(0),
            Recorded::NewInstruction(1),
            Recorded::CycleEnd(1),
            Recorded::NewInstruction(2),
            Recorded::CycleEnd(2),
            Recorded::Stopped(Vec::new()),
        ]
    );
}

#[test]
fn test_listener_stop_request_ends_run() {
    let mut ctx = TestContext::new(&straight_line_program(6));
    let recorder = RecordingListener::attach(ctx.sim.events(), &[EventCode::NewInstruction]);
    recorder.borrow_mut().stop_at = Some((3, StopReason::UserRequested));

    ctx.run();

    let controller = ctx.controller();
    assert_eq!(controller.program_counter(), 3);
    assert_eq!(controller.cycle_count(), 3);
    assert_eq!(controller.stop_reasons(), &[StopReason::UserRequested]);
}

#[test]
fn test_memory_accesses_are_published() {
    let mut ctx = TestContext::new(&memory_program());
    let recorder = RecordingListener::attach(ctx.sim.events(), &[EventCode::MemoryAccess]);

    ctx.run();

    assert_eq!(
        recorder.borrow().events,
        vec![
            Recorded::MemoryAccess(AccessKind::Write, 64),
            Recorded::MemoryAccess(AccessKind::Read, 64),
        ]
    );
}

#[test]
fn test_fatal_runtime_error_skips_cycle_end() {
    let mut ctx = TestContext::new(&division_by_zero_program());
    let recorder = RecordingListener::attach(ctx.sim.events(), ALL_EVENTS);

    ctx.run();

    assert_eq!(
        recorder.borrow().events,
        vec![
            Recorded::CycleEnd(0),
            Recorded::NewInstruction(1),
            Recorded::RuntimeError(RuntimeErrorKind::DivisionByZero),
            Recorded::Stopped(vec![StopReason::RuntimeError]),
        ]
    );
}
