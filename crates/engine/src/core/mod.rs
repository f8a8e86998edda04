//! Simulated processor core.
//!
//! This module provides:
//! 1. **State:** All mutable run state of the core and its clock-phase protocol.
//! 2. **Units:** Operation executors bound to function units at load time.

/// Machine state model.
pub mod state;
/// Operation executors and the operation pool.
pub mod units;

pub use state::MachineState;
pub use units::OperationPool;
