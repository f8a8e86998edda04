//! Program representation consumed by the simulator.
//!
//! Instructions are already scheduled: each one lists the bus moves and long
//! immediates it carries. Addresses are in instruction address units.

use serde::Deserialize;

use super::machine::GuardTarget;
use crate::common::{InstructionAddress, SimError};

/// A loaded program.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Program {
    /// Initial program counter.
    pub start_address: InstructionAddress,
    /// Address of the entry procedure; defaults to the start address.
    #[serde(default)]
    pub entry_address: Option<InstructionAddress>,
    /// Procedures in address order.
    #[serde(default)]
    pub procedures: Vec<Procedure>,
    /// Initialized data.
    #[serde(default)]
    pub data: Vec<DataSection>,
}

impl Program {
    /// Parses a program from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::IllegalProgram`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        serde_json::from_str(json).map_err(|e| SimError::IllegalProgram(e.to_string()))
    }

    /// Returns the entry procedure address.
    pub fn entry(&self) -> InstructionAddress {
        self.entry_address.unwrap_or(self.start_address)
    }

    /// Iterates over every instruction of every procedure.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.procedures.iter().flat_map(|p| p.instructions.iter())
    }

    /// Returns the number of explicit instructions.
    pub fn instruction_count(&self) -> usize {
        self.procedures.iter().map(|p| p.instructions.len()).sum()
    }

    /// Returns the address one past the highest instruction.
    ///
    /// A program counter equal to this address has fallen off the end of the
    /// program. An empty program yields the start address.
    pub fn first_illegal_address(&self) -> InstructionAddress {
        self.instructions()
            .map(|i| i.address + i.width)
            .max()
            .unwrap_or(self.start_address)
    }

    /// Returns the procedure containing `address`.
    pub fn procedure_at(&self, address: InstructionAddress) -> Option<&Procedure> {
        self.procedures.iter().find(|p| {
            p.instructions
                .iter()
                .any(|i| (i.address..i.address + i.width).contains(&address))
        })
    }

    /// Returns the procedure with the given name.
    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        self.procedures.iter().find(|p| p.name == name)
    }
}

/// A named sequence of instructions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Procedure {
    /// Procedure name.
    pub name: String,
    /// Instructions in address order.
    pub instructions: Vec<Instruction>,
}

impl Procedure {
    /// Returns the address of the first instruction.
    pub fn start(&self) -> Option<InstructionAddress> {
        self.instructions.iter().map(|i| i.address).min()
    }
}

/// One explicitly encoded instruction.
#[derive(Debug, Clone, Deserialize)]
pub struct Instruction {
    /// Instruction address.
    pub address: InstructionAddress,
    /// Number of address units the instruction occupies.
    #[serde(default = "Instruction::default_width")]
    pub width: u64,
    /// Bus moves.
    #[serde(default)]
    pub moves: Vec<Move>,
    /// Long immediates written by the instruction.
    #[serde(default)]
    pub immediates: Vec<LongImmediate>,
    /// Transports implied by this instruction in the operation-triggered model.
    #[serde(default)]
    pub implicit: Vec<ImplicitInstruction>,
    /// Whether executing this instruction ends the program.
    #[serde(default)]
    pub exit_point: bool,
}

impl Instruction {
    const fn default_width() -> u64 {
        1
    }

    /// Creates an empty instruction of width one.
    pub const fn at(address: InstructionAddress) -> Self {
        Self {
            address,
            width: 1,
            moves: Vec::new(),
            immediates: Vec::new(),
            implicit: Vec::new(),
            exit_point: false,
        }
    }
}

/// A transport implied by an explicit instruction.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImplicitInstruction {
    /// Transports to perform.
    pub moves: Vec<Move>,
    /// Whether executing these transports ends the program.
    #[serde(default)]
    pub exit_point: bool,
}

/// A single data transport.
#[derive(Debug, Clone, Deserialize)]
pub struct Move {
    /// Bus carrying the value.
    pub bus: String,
    /// Value source.
    pub source: Terminal,
    /// Value destination.
    pub destination: Terminal,
    /// Guard squashing the move when false.
    #[serde(default)]
    pub guard: Option<MoveGuard>,
}

/// A move endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "PascalCase")]
pub enum Terminal {
    /// A register.
    Register {
        /// Register file name.
        file: String,
        /// Register index.
        index: usize,
    },
    /// A function unit or control unit port, optionally selecting an operation.
    FuPort {
        /// Unit name.
        unit: String,
        /// Port name.
        port: String,
        /// Operation latched by a write to this port.
        #[serde(default)]
        operation: Option<String>,
    },
    /// A short immediate encoded in the instruction.
    Immediate {
        /// Encoded value.
        value: i64,
    },
    /// A register of a long immediate unit.
    ImmediateRegister {
        /// Immediate unit name.
        unit: String,
        /// Register index.
        index: usize,
    },
}

/// Guard reference used by a move.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MoveGuard {
    /// Predicate source; must match a guard of the move's bus.
    pub target: GuardTarget,
    /// Whether the predicate is negated.
    #[serde(default)]
    pub inverted: bool,
}

/// A long immediate written into an immediate unit register.
#[derive(Debug, Clone, Deserialize)]
pub struct LongImmediate {
    /// Immediate unit name.
    pub unit: String,
    /// Destination register index.
    pub index: usize,
    /// Encoded value.
    pub value: i64,
}

/// Initialized bytes placed in an address space at load time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataSection {
    /// Target address space.
    pub address_space: String,
    /// First byte address.
    pub start: u64,
    /// Contents.
    pub bytes: Vec<u8>,
}
