//! Memory system: every address space of one core.

use std::collections::HashMap;

use super::{AccessKind, Memory, MemoryAccess};
use crate::common::{RuntimeError, SimError};
use crate::model::machine::AddressSpaceDesc;

/// Address spaces of the core, split into local and shared memories.
#[derive(Debug, Clone, Default)]
pub struct MemorySystem {
    memories: Vec<Memory>,
    index: HashMap<String, usize>,
    accesses: Vec<MemoryAccess>,
}

impl MemorySystem {
    /// Creates a memory for each address space.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::IllegalMachine`] on duplicate names or inverted ranges.
    pub fn new(spaces: &[AddressSpaceDesc]) -> Result<Self, SimError> {
        let mut system = Self::default();
        for desc in spaces {
            if desc.end < desc.start {
                return Err(SimError::IllegalMachine(format!(
                    "address space '{}' ends before it starts",
                    desc.name
                )));
            }
            if system
                .index
                .insert(desc.name.clone(), system.memories.len())
                .is_some()
            {
                return Err(SimError::IllegalMachine(format!(
                    "duplicate address space '{}'",
                    desc.name
                )));
            }
            system.memories.push(Memory::new(desc));
        }
        Ok(system)
    }

    /// Returns the index of the named address space.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if no such address space exists.
    pub fn index_of(&self, name: &str) -> Result<usize, SimError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| SimError::not_found("address space", name))
    }

    /// Returns the memory at `index`.
    pub fn memory(&self, index: usize) -> Option<&Memory> {
        self.memories.get(index)
    }

    /// Returns the named memory.
    pub fn by_name(&self, name: &str) -> Option<&Memory> {
        self.index.get(name).and_then(|i| self.memories.get(*i))
    }

    /// Copies initialized data into an address space.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::IllegalProgram`] if the space is unknown or the data does not fit.
    pub fn load_section(&mut self, space: &str, start: u64, bytes: &[u8]) -> Result<(), SimError> {
        let index = self
            .index_of(space)
            .map_err(|e| e.into_illegal_program("data section"))?;
        self.memories[index]
            .initialize(start, bytes)
            .map_err(|e| SimError::IllegalProgram(e.message))
    }

    pub(crate) fn load(
        &mut self,
        index: usize,
        address: u64,
        size: usize,
    ) -> Result<u64, RuntimeError> {
        let memory = &self.memories[index];
        let value = memory.read(address, size)?;
        self.accesses.push(MemoryAccess {
            address_space: memory.name().to_string(),
            address,
            size,
            kind: AccessKind::Read,
            value,
        });
        Ok(value)
    }

    pub(crate) fn store(
        &mut self,
        index: usize,
        address: u64,
        size: usize,
        value: u64,
    ) -> Result<(), RuntimeError> {
        let memory = &mut self.memories[index];
        memory.write(address, size, value)?;
        self.accesses.push(MemoryAccess {
            address_space: memory.name().to_string(),
            address,
            size,
            kind: AccessKind::Write,
            value,
        });
        Ok(())
    }

    /// Commits stores of memories private to this core.
    pub fn advance_local(&mut self) {
        self.memories
            .iter_mut()
            .filter(|m| !m.is_shared())
            .for_each(Memory::advance_clock);
    }

    /// Commits stores of shared memories.
    pub fn advance_shared(&mut self) {
        self.memories
            .iter_mut()
            .filter(|m| m.is_shared())
            .for_each(Memory::advance_clock);
    }

    /// Removes and returns the accesses recorded since the last call.
    pub fn take_accesses(&mut self) -> Vec<MemoryAccess> {
        std::mem::take(&mut self.accesses)
    }

    /// Drops buffered stores and access records.
    pub fn reset(&mut self) {
        self.memories.iter_mut().for_each(Memory::reset);
        self.accesses.clear();
    }
}
