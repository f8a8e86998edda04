//! Synchronous event bus.
//!
//! Every component announces lifecycle events through this bus. It provides:
//! 1. **Event Codes:** The five simulation events observers can subscribe to.
//! 2. **Listeners:** A single-method trait receiving the event and a read-only view of the machine.
//! 3. **Dispatch:** In-order, synchronous delivery to a snapshot of the registrations.
//!
//! The same listener may be registered several times for one code; each
//! registration receives the event and each unregistration removes one.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

use super::controller::StopReason;
use crate::common::{ClockCycleCount, InstructionAddress, RuntimeErrorReport, SimValue};
use crate::memory::MemoryAccess;

/// Identifier of a simulation event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventCode {
    /// The program counter reached a new instruction.
    NewInstruction,
    /// A simulated cycle completed.
    CycleEnd,
    /// The simulated program raised a runtime error.
    RuntimeError,
    /// A run call returned control to the caller.
    SimulationStopped,
    /// An operation accessed data memory.
    MemoryAccess,
}

/// An event together with its payload.
#[derive(Clone, Copy, Debug)]
pub enum SimulationEvent<'a> {
    /// The program counter reached `address`.
    NewInstruction {
        /// Address of the next instruction to execute.
        address: InstructionAddress,
    },
    /// Cycle `cycle` completed.
    CycleEnd {
        /// Index of the completed cycle.
        cycle: ClockCycleCount,
    },
    /// A runtime error was raised.
    RuntimeError(&'a RuntimeErrorReport),
    /// The run stopped for the given reasons.
    SimulationStopped {
        /// Reasons recorded for this stop.
        reasons: &'a [StopReason],
    },
    /// A load or store was performed.
    MemoryAccess(&'a MemoryAccess),
}

impl SimulationEvent<'_> {
    /// Returns the code listeners subscribe with.
    pub const fn code(&self) -> EventCode {
        match self {
            Self::NewInstruction { .. } => EventCode::NewInstruction,
            Self::CycleEnd { .. } => EventCode::CycleEnd,
            Self::RuntimeError(_) => EventCode::RuntimeError,
            Self::SimulationStopped { .. } => EventCode::SimulationStopped,
            Self::MemoryAccess(_) => EventCode::MemoryAccess,
        }
    }
}

/// Read-only view of the simulated machine offered to listeners and evaluators.
pub trait StateView {
    /// Returns the program counter.
    fn program_counter(&self) -> InstructionAddress;

    /// Returns the number of completed cycles.
    fn cycle_count(&self) -> ClockCycleCount;

    /// Returns the value of a qualified architectural name such as `RF.3` or `ALU.out1`.
    fn value_of(&self, name: &str) -> Option<SimValue>;
}

/// Per-dispatch context: the machine view plus the stop requests listeners made.
pub struct EventContext<'a> {
    view: &'a dyn StateView,
    stop_requests: Vec<StopReason>,
}

impl<'a> EventContext<'a> {
    /// Creates a context over `view` with no stop requests.
    pub fn new(view: &'a dyn StateView) -> Self {
        Self {
            view,
            stop_requests: Vec::new(),
        }
    }

    /// Returns the machine view.
    pub fn view(&self) -> &'a dyn StateView {
        self.view
    }

    /// Asks the controller to stop after the current cycle.
    pub fn request_stop(&mut self, reason: StopReason) {
        self.stop_requests.push(reason);
    }

    /// Returns the stop requests made so far.
    pub fn stop_requests(&self) -> &[StopReason] {
        &self.stop_requests
    }

    /// Consumes the context, returning the stop requests.
    pub fn into_stop_requests(self) -> Vec<StopReason> {
        self.stop_requests
    }
}

impl fmt::Debug for EventContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("program_counter", &self.view.program_counter())
            .field("cycle", &self.view.cycle_count())
            .field("stop_requests", &self.stop_requests)
            .finish()
    }
}

/// Receiver of simulation events.
///
/// Listeners observe the machine only through the context; they never
/// mutate machine state.
pub trait Listener {
    /// Handles one event.
    fn handle_event(&mut self, event: &SimulationEvent<'_>, ctx: &mut EventContext<'_>);
}

/// Shared handle to a listener, as stored by the bus.
pub type SharedListener = Rc<RefCell<dyn Listener>>;

struct Registration {
    code: EventCode,
    listener: SharedListener,
}

/// Publish/subscribe hub shared by every component of a session.
///
/// Cloning yields another handle to the same registrations.
#[derive(Clone, Default)]
pub struct EventBus {
    registrations: Rc<RefCell<Vec<Registration>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("registrations", &self.registrations.borrow().len())
            .finish()
    }
}

impl EventBus {
    /// Creates a bus with no registrations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `code`.
    pub fn register_listener(&self, code: EventCode, listener: SharedListener) {
        self.registrations
            .borrow_mut()
            .push(Registration { code, listener });
    }

    /// Removes one registration of `listener` for `code`.
    ///
    /// Returns `false` if no such registration exists.
    pub fn unregister_listener(&self, code: EventCode, listener: &SharedListener) -> bool {
        let mut registrations = self.registrations.borrow_mut();
        let found = registrations.iter().rposition(|r| {
            r.code == code && std::ptr::addr_eq(Rc::as_ptr(&r.listener), Rc::as_ptr(listener))
        });
        found.is_some_and(|i| {
            let _ = registrations.remove(i);
            true
        })
    }

    /// Returns the number of registrations for `code`.
    pub fn listener_count(&self, code: EventCode) -> usize {
        self.registrations
            .borrow()
            .iter()
            .filter(|r| r.code == code)
            .count()
    }

    /// Returns `true` if `listener` holds at least one registration for `code`.
    pub fn is_registered(&self, code: EventCode, listener: &SharedListener) -> bool {
        self.registrations.borrow().iter().any(|r| {
            r.code == code && std::ptr::addr_eq(Rc::as_ptr(&r.listener), Rc::as_ptr(listener))
        })
    }

    /// Delivers `event` to every listener registered for its code.
    ///
    /// Listeners run in registration order. Registrations made or removed
    /// during dispatch take effect from the next event.
    pub fn handle_event(&self, event: &SimulationEvent<'_>, ctx: &mut EventContext<'_>) {
        let code = event.code();
        let targets: Vec<SharedListener> = self
            .registrations
            .borrow()
            .iter()
            .filter(|r| r.code == code)
            .map(|r| Rc::clone(&r.listener))
            .collect();
        for listener in targets {
            match listener.try_borrow_mut() {
                Ok(mut l) => l.handle_event(event, ctx),
                Err(_) => warn!(?code, "listener is already handling an event; skipped"),
            }
        }
    }
}
