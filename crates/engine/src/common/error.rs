//! Error and fault definitions.
//!
//! This module defines how failures surface from the simulation core. It provides:
//! 1. **Simulation Errors:** Load, lookup, range, and execution failures returned synchronously.
//! 2. **Runtime Errors:** Faults raised by the simulated program while an instruction executes.
//! 3. **Reports:** Severity-tagged runtime error records published through the event bus.

use thiserror::Error;

use super::types::{ClockCycleCount, InstructionAddress};

/// Errors returned by loading, lookup, and run operations.
///
/// Runtime errors of the simulated program are not part of this type; they
/// travel as [`RuntimeErrorReport`] values so that every observer sees them.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SimError {
    /// The machine description cannot be simulated.
    #[error("illegal machine: {0}")]
    IllegalMachine(String),

    /// The program references something the machine does not provide.
    #[error("illegal program: {0}")]
    IllegalProgram(String),

    /// A named unit or a stop-point handle does not exist.
    #[error("{kind} '{name}' not found")]
    InstanceNotFound {
        /// Kind of the missing instance (bus, function unit, stop point, ...).
        kind: &'static str,
        /// Name or handle that failed to resolve.
        name: String,
    },

    /// An index is outside the valid range of a collection.
    #[error("{what} index {index} out of range (count {count})")]
    OutOfRange {
        /// Collection being indexed.
        what: &'static str,
        /// Requested index.
        index: usize,
        /// Number of valid entries.
        count: usize,
    },

    /// An internal invariant was violated while simulating.
    #[error("simulation execution error: {0}")]
    SimulationExecution(String),
}

impl SimError {
    /// Creates an [`SimError::InstanceNotFound`] for the given kind and name.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::InstanceNotFound {
            kind,
            name: name.into(),
        }
    }

    /// Converts a lookup failure into a load-time program error.
    ///
    /// Other variants pass through unchanged.
    #[must_use]
    pub fn into_illegal_program(self, context: &str) -> Self {
        match self {
            Self::InstanceNotFound { kind, name } => {
                Self::IllegalProgram(format!("{context}: unknown {kind} '{name}'"))
            }
            other => other,
        }
    }

    /// Converts a lookup failure into a load-time machine error.
    #[must_use]
    pub fn into_illegal_machine(self, context: &str) -> Self {
        match self {
            Self::InstanceNotFound { kind, name } => {
                Self::IllegalMachine(format!("{context}: unknown {kind} '{name}'"))
            }
            other => other,
        }
    }
}

/// Category of a runtime error raised by the simulated program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuntimeErrorKind {
    /// Integer division or modulo with a zero divisor.
    DivisionByZero,
    /// Load or store outside the unit's address space.
    InvalidMemoryReference,
    /// A unit was triggered without a valid operation code.
    UnknownOperation,
    /// Two operations of one unit would write the same result port in the same cycle.
    ResourceConflict,
}

/// How the controller treats a runtime error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Severity {
    /// Logged and recorded; the run continues.
    Minor,
    /// Stops the run with a runtime-error stop reason.
    #[default]
    Fatal,
}

/// A fault raised while executing an instruction.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct RuntimeError {
    /// Category of the fault.
    pub kind: RuntimeErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Address of the instruction that was executing, once known.
    pub address: Option<InstructionAddress>,
}

impl RuntimeError {
    /// Creates a runtime error without an instruction address.
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            address: None,
        }
    }

    /// Attaches the address of the executing instruction.
    #[must_use]
    pub const fn at(mut self, address: InstructionAddress) -> Self {
        self.address = Some(address);
        self
    }
}

/// A runtime error together with the severity the controller assigned to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeErrorReport {
    /// Severity decided by the configured policy.
    pub severity: Severity,
    /// The fault itself.
    pub error: RuntimeError,
    /// Cycle in which the fault was raised.
    pub cycle: ClockCycleCount,
}
