//! Common types shared by every simulator component.
//!
//! This module provides:
//! 1. **Errors:** Load, lookup, range, execution, and runtime error types.
//! 2. **Values:** Width-aware simulated values.
//! 3. **Scalars:** Instruction addresses, cycle counts, and the shared clock handle.

/// Error types and runtime error reports.
pub mod error;
/// Instruction address and cycle count aliases plus the shared clock.
pub mod types;
/// Width-aware simulated values.
pub mod value;

pub use error::{RuntimeError, RuntimeErrorKind, RuntimeErrorReport, Severity, SimError};
pub use types::{ClockCycleCount, InstructionAddress, SimulationClock};
pub use value::SimValue;
