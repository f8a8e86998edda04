//! Operation executors.
//!
//! This module holds the behaviour of every operation a function unit can
//! execute. It provides:
//! 1. **Operation Pool:** Name to executor registry, constructed once and shared read-only.
//! 2. **ALU:** Integer arithmetic, logic, shift, compare, and extension operations.
//! 3. **LSU:** Big-endian loads and stores against the unit's address space.
//!
//! Executors are plain function pointers resolved when the machine state is
//! built, so the per-cycle path never performs a name lookup.

/// Integer arithmetic and logic operations.
pub mod alu;
/// Load and store operations.
pub mod lsu;

use std::collections::HashMap;

use crate::common::{RuntimeError, RuntimeErrorKind, SimValue};
use crate::memory::MemorySystem;

/// Execution context handed to an operation when it is triggered.
#[derive(Debug)]
pub struct OperationContext<'a> {
    memory: Option<(&'a mut MemorySystem, usize)>,
}

impl<'a> OperationContext<'a> {
    /// Creates a context for a unit with the given address space binding.
    pub const fn new(memory: Option<(&'a mut MemorySystem, usize)>) -> Self {
        Self { memory }
    }

    /// Returns the memory system and the unit's address space index.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidMemoryReference` runtime error if the unit has no address space.
    pub fn memory(&mut self) -> Result<(&mut MemorySystem, usize), RuntimeError> {
        match self.memory.as_mut() {
            Some((system, index)) => Ok((&mut **system, *index)),
            None => Err(RuntimeError::new(
                RuntimeErrorKind::InvalidMemoryReference,
                "memory operation on a unit without an address space",
            )),
        }
    }
}

/// Behaviour of an operation: maps input operands to results.
pub type OperationBehavior =
    fn(&[SimValue], &mut OperationContext<'_>) -> Result<Vec<SimValue>, RuntimeError>;

/// Static description of an operation.
#[derive(Clone, Copy)]
pub struct OperationDef {
    /// Lower-case operation name.
    pub name: &'static str,
    /// Number of input operands.
    pub inputs: usize,
    /// Number of results.
    pub outputs: usize,
    /// Executor.
    pub behavior: OperationBehavior,
}

impl std::fmt::Debug for OperationDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDef")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Registry of available operations.
///
/// Constructed once per session and passed by reference to every machine
/// state builder.
#[derive(Debug, Clone)]
pub struct OperationPool {
    operations: HashMap<&'static str, OperationDef>,
}

impl Default for OperationPool {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl OperationPool {
    /// Creates an empty pool.
    pub fn empty() -> Self {
        Self {
            operations: HashMap::new(),
        }
    }

    /// Creates a pool holding every built-in ALU and LSU operation.
    pub fn with_builtins() -> Self {
        let mut pool = Self::empty();
        alu::OPERATIONS
            .iter()
            .chain(lsu::OPERATIONS.iter())
            .for_each(|def| pool.register(*def));
        pool
    }

    /// Adds or replaces an operation.
    pub fn register(&mut self, def: OperationDef) {
        let _ = self.operations.insert(def.name, def);
    }

    /// Looks an operation up by name, ignoring case.
    pub fn lookup(&self, name: &str) -> Option<&OperationDef> {
        self.operations.get(name.to_ascii_lowercase().as_str())
    }

    /// Returns the number of registered operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns `true` if no operation is registered.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
