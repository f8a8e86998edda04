//! Interpretive backend: one instruction memory lookup per cycle.

use super::ExecutionEngine;
use crate::common::{InstructionAddress, SimError};
use crate::core::state::MachineState;
use crate::sim::executable::ExecutionOutcome;
use crate::sim::instruction_memory::InstructionMemory;

/// Executes instructions straight from the instruction memory.
#[derive(Debug, Clone)]
pub struct InterpretedEngine {
    memory: InstructionMemory,
}

impl InterpretedEngine {
    /// Creates an engine over `memory`.
    pub const fn new(memory: InstructionMemory) -> Self {
        Self { memory }
    }
}

impl ExecutionEngine for InterpretedEngine {
    fn execute_instruction(
        &mut self,
        pc: InstructionAddress,
        state: &mut MachineState,
    ) -> Result<Option<ExecutionOutcome>, SimError> {
        Ok(self
            .memory
            .instruction_at_mut(pc)
            .map(|instruction| instruction.execute(state)))
    }

    fn implicit_count(&self, pc: InstructionAddress) -> usize {
        self.memory.implicit_instructions_at(pc).len()
    }

    fn execute_implicit(
        &mut self,
        pc: InstructionAddress,
        index: usize,
        state: &mut MachineState,
    ) -> Result<ExecutionOutcome, SimError> {
        let chain = self.memory.implicit_instructions_at_mut(pc);
        let count = chain.len();
        let instruction = chain.get_mut(index).ok_or(SimError::OutOfRange {
            what: "implicit instruction",
            index,
            count,
        })?;
        Ok(instruction.execute(state))
    }

    fn instruction_memory(&self) -> &InstructionMemory {
        &self.memory
    }

    fn reset(&mut self) {
        self.memory.reset_execution_counts();
    }
}
