//! Execution backends and backend type erasure.
//!
//! This module defines the seam between the controller and the code that
//! performs an instruction's transports:
//! 1. **`ExecutionEngine`:** Executes the explicit and implicit instructions at an address.
//! 2. **`InterpretedEngine`:** Walks the instruction memory every cycle.
//! 3. **`CompiledEngine`:** Dispatches pre-translated basic blocks through a jump table.
//! 4. **`EngineDispatch`:** Enum dispatch for storage in the non-generic controller.
//!
//! Both engines perform clock-free work only; the controller runs the clock
//! phases between calls, so every backend observes the same cycle boundaries.

/// Basic-block compiled backend.
pub mod compiled;
/// Interpretive backend.
pub mod interpreted;

pub use compiled::CompiledEngine;
pub use interpreted::InterpretedEngine;

use super::executable::ExecutionOutcome;
use super::instruction_memory::InstructionMemory;
use crate::common::{InstructionAddress, SimError};
use crate::core::state::MachineState;

/// A pluggable instruction executor.
pub trait ExecutionEngine {
    /// Executes the explicit instruction at `pc`.
    ///
    /// Returns `None` if no instruction lives at `pc`, which the controller
    /// treats as a no-op cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if the backend's tables are
    /// inconsistent with the instruction memory.
    fn execute_instruction(
        &mut self,
        pc: InstructionAddress,
        state: &mut MachineState,
    ) -> Result<Option<ExecutionOutcome>, SimError>;

    /// Returns how many implicit instructions are chained at `pc`.
    fn implicit_count(&self, pc: InstructionAddress) -> usize;

    /// Executes the implicit instruction `index` chained at `pc`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::OutOfRange`] if `index` is not below [`Self::implicit_count`].
    fn execute_implicit(
        &mut self,
        pc: InstructionAddress,
        index: usize,
        state: &mut MachineState,
    ) -> Result<ExecutionOutcome, SimError>;

    /// Returns the instruction memory the engine executes.
    fn instruction_memory(&self) -> &InstructionMemory;

    /// Forgets per-run bookkeeping such as execution counts.
    fn reset(&mut self);
}

/// Type-erased engine for storage in the controller.
#[derive(Debug)]
pub enum EngineDispatch {
    /// Interpretive backend.
    Interpreted(InterpretedEngine),
    /// Compiled backend.
    Compiled(Box<CompiledEngine>),
}

impl EngineDispatch {
    fn engine(&self) -> &dyn ExecutionEngine {
        match self {
            Self::Interpreted(e) => e,
            Self::Compiled(e) => e.as_ref(),
        }
    }

    fn engine_mut(&mut self) -> &mut dyn ExecutionEngine {
        match self {
            Self::Interpreted(e) => e,
            Self::Compiled(e) => e.as_mut(),
        }
    }
}

impl ExecutionEngine for EngineDispatch {
    fn execute_instruction(
        &mut self,
        pc: InstructionAddress,
        state: &mut MachineState,
    ) -> Result<Option<ExecutionOutcome>, SimError> {
        self.engine_mut().execute_instruction(pc, state)
    }

    fn implicit_count(&self, pc: InstructionAddress) -> usize {
        self.engine().implicit_count(pc)
    }

    fn execute_implicit(
        &mut self,
        pc: InstructionAddress,
        index: usize,
        state: &mut MachineState,
    ) -> Result<ExecutionOutcome, SimError> {
        self.engine_mut().execute_implicit(pc, index, state)
    }

    fn instruction_memory(&self) -> &InstructionMemory {
        self.engine().instruction_memory()
    }

    fn reset(&mut self) {
        self.engine_mut().reset();
    }
}
