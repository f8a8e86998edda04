//! Simulation driver and debugging support.
//!
//! Everything above the machine state: program resolution, the instruction
//! memory, the execution backends, the cycle controller, the event bus, and
//! the stop point registry.

/// Program resolution into executable instructions.
pub mod builder;
/// Cycle-execution driver.
pub mod controller;
/// Interchangeable execution backends.
pub mod engine;
/// Synchronous event bus.
pub mod events;
/// Resolved, executable instructions.
pub mod executable;
/// Address-indexed instruction storage.
pub mod instruction_memory;
/// Simulation session owning the controller and stop points.
pub mod simulator;
/// Breakpoints, watches, and conditions.
pub mod stop_point;
/// Handle-keyed stop point registry.
pub mod stop_point_manager;
/// Qualified names of architectural storage.
pub mod symbols;

pub use controller::{SimulationController, SimulationStatus, StopHandle, StopReason};
pub use events::{EventBus, EventCode, Listener, SimulationEvent, StateView};
pub use simulator::Simulator;
pub use stop_point::{Condition, StopPoint};
pub use stop_point_manager::{StopPointHandle, StopPointManager};
