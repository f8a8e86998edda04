//! Instruction memory: address-indexed executable instructions.

use std::collections::{BTreeMap, BTreeSet};

use super::executable::ExecutableInstruction;
use crate::common::{InstructionAddress, SimError};

/// Executable instructions of a loaded program, keyed by address.
///
/// Each address holds at most one explicit instruction and any number of
/// implicit instructions executed right after it in the same cycle. An
/// address without an instruction is a no-op cycle, not an error.
#[derive(Debug, Clone, Default)]
pub struct InstructionMemory {
    instructions: BTreeMap<InstructionAddress, ExecutableInstruction>,
    implicit: BTreeMap<InstructionAddress, Vec<ExecutableInstruction>>,
    procedure_starts: BTreeSet<InstructionAddress>,
}

impl InstructionMemory {
    /// Creates an empty instruction memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an explicit instruction at its address.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::IllegalProgram`] if the address is already occupied.
    pub fn add_instruction(&mut self, instruction: ExecutableInstruction) -> Result<(), SimError> {
        let address = instruction.address();
        if self.instructions.contains_key(&address) {
            return Err(SimError::IllegalProgram(format!(
                "two instructions at address {address:#x}"
            )));
        }
        let _ = self.instructions.insert(address, instruction);
        Ok(())
    }

    /// Appends an implicit instruction to `address`.
    pub fn add_implicit_instruction(
        &mut self,
        address: InstructionAddress,
        instruction: ExecutableInstruction,
    ) {
        self.implicit.entry(address).or_default().push(instruction);
    }

    /// Records the first address of a procedure.
    pub fn add_procedure_start(&mut self, address: InstructionAddress) {
        let _ = self.procedure_starts.insert(address);
    }

    /// Returns the first addresses of every procedure.
    pub const fn procedure_starts(&self) -> &BTreeSet<InstructionAddress> {
        &self.procedure_starts
    }

    /// Returns `true` if an explicit instruction exists at `address`.
    pub fn has_instruction_at(&self, address: InstructionAddress) -> bool {
        self.instructions.contains_key(&address)
    }

    /// Returns the explicit instruction at `address`.
    pub fn instruction_at(&self, address: InstructionAddress) -> Option<&ExecutableInstruction> {
        self.instructions.get(&address)
    }

    /// Returns the explicit instruction at `address` for execution bookkeeping.
    pub fn instruction_at_mut(
        &mut self,
        address: InstructionAddress,
    ) -> Option<&mut ExecutableInstruction> {
        self.instructions.get_mut(&address)
    }

    /// Returns `true` if implicit instructions follow the one at `address`.
    pub fn has_implicit_instructions_at(&self, address: InstructionAddress) -> bool {
        self.implicit.get(&address).is_some_and(|v| !v.is_empty())
    }

    /// Returns the implicit instructions at `address`, in insertion order.
    pub fn implicit_instructions_at(
        &self,
        address: InstructionAddress,
    ) -> &[ExecutableInstruction] {
        match self.implicit.get(&address) {
            Some(v) => v.as_slice(),
            None => &[],
        }
    }

    /// Returns the implicit instructions at `address` for execution bookkeeping.
    pub fn implicit_instructions_at_mut(
        &mut self,
        address: InstructionAddress,
    ) -> &mut [ExecutableInstruction] {
        match self.implicit.get_mut(&address) {
            Some(v) => v.as_mut_slice(),
            None => &mut [],
        }
    }

    /// Zeroes every execution counter without touching program content.
    pub fn reset_execution_counts(&mut self) {
        self.instructions
            .values_mut()
            .chain(self.implicit.values_mut().flatten())
            .for_each(ExecutableInstruction::reset_execution_count);
    }

    /// Returns the number of explicit instructions.
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Iterates over explicit instructions in address order.
    pub fn iter(&self) -> impl Iterator<Item = &ExecutableInstruction> {
        self.instructions.values()
    }
}
