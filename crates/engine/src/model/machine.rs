//! Machine description consumed by the simulator.
//!
//! The description is produced by an external loader and is never mutated by
//! the core. Every name used by a program must resolve against it.

use serde::Deserialize;

use crate::common::SimError;

/// Default width of the control unit's address ports.
const DEFAULT_ADDRESS_WIDTH: u32 = 32;

/// Architecture topology of one processor core.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Machine {
    /// Machine name, used in log output.
    pub name: String,
    /// Transport buses.
    #[serde(default)]
    pub buses: Vec<BusDesc>,
    /// Function units other than the control unit.
    #[serde(default)]
    pub function_units: Vec<FunctionUnitDesc>,
    /// Register files.
    #[serde(default)]
    pub register_files: Vec<RegisterFileDesc>,
    /// Long immediate units.
    #[serde(default)]
    pub immediate_units: Vec<ImmediateUnitDesc>,
    /// Data address spaces.
    #[serde(default)]
    pub address_spaces: Vec<AddressSpaceDesc>,
    /// Global control unit.
    pub control_unit: ControlUnitDesc,
}

impl Machine {
    /// Parses a machine description from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::IllegalMachine`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        serde_json::from_str(json).map_err(|e| SimError::IllegalMachine(e.to_string()))
    }
}

/// A transport bus.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BusDesc {
    /// Bus name.
    pub name: String,
    /// Data width in bits.
    pub width: u32,
    /// Width of the short immediate field; zero if the bus carries none.
    #[serde(default)]
    pub immediate_width: u32,
    /// Whether short immediates are sign-extended to the bus width.
    #[serde(default)]
    pub sign_extends: bool,
    /// Guards available to moves on this bus.
    #[serde(default)]
    pub guards: Vec<GuardDesc>,
}

/// A guard supported by a bus.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GuardDesc {
    /// Source of the predicate.
    pub target: GuardTarget,
    /// Whether the predicate is negated.
    #[serde(default)]
    pub inverted: bool,
}

/// Source of a guard predicate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "PascalCase")]
pub enum GuardTarget {
    /// A register in a register file.
    Register {
        /// Register file name.
        file: String,
        /// Register index.
        index: usize,
    },
    /// A port of a function unit.
    Port {
        /// Function unit name.
        unit: String,
        /// Port name.
        port: String,
    },
    /// Always true (or always false when inverted).
    Unconditional,
}

/// A function unit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionUnitDesc {
    /// Unit name.
    pub name: String,
    /// Operand and result ports.
    pub ports: Vec<PortDesc>,
    /// Operations the unit implements.
    pub operations: Vec<OperationDesc>,
    /// Address space accessed by memory operations, if any.
    #[serde(default)]
    pub address_space: Option<String>,
}

/// A function unit port.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortDesc {
    /// Port name.
    pub name: String,
    /// Width in bits.
    pub width: u32,
    /// Whether writing the port triggers the latched operation.
    #[serde(default)]
    pub triggering: bool,
}

/// An operation implemented by a function unit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationDesc {
    /// Operation name, matched case-insensitively against the operation pool.
    pub name: String,
    /// Cycles between trigger and result visibility.
    pub latency: u32,
    /// Operand to port bindings.
    pub bindings: Vec<OperandBinding>,
}

/// Binding of a 1-based operand number to a port.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperandBinding {
    /// Operand number; inputs first, then outputs.
    pub operand: usize,
    /// Bound port name.
    pub port: String,
}

/// A register file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterFileDesc {
    /// Register file name.
    pub name: String,
    /// Number of registers.
    pub size: usize,
    /// Register width in bits.
    pub width: u32,
    /// Extra guard latency added to the control unit's global guard latency.
    #[serde(default)]
    pub guard_latency: u32,
}

/// A long immediate unit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImmediateUnitDesc {
    /// Unit name.
    pub name: String,
    /// Number of registers.
    pub size: usize,
    /// Register width in bits.
    pub width: u32,
    /// Cycles between the encoding instruction and value visibility.
    #[serde(default)]
    pub latency: u32,
}

/// A byte-addressed, big-endian data address space.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddressSpaceDesc {
    /// Address space name.
    pub name: String,
    /// Lowest valid address.
    pub start: u64,
    /// Highest valid address (inclusive).
    pub end: u64,
    /// Whether the memory is shared between cores.
    #[serde(default)]
    pub shared: bool,
}

/// The global control unit.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlUnitDesc {
    /// Unit name, used as the unit of control-flow moves.
    pub name: String,
    /// Instructions executed after a control transfer before it takes effect.
    #[serde(default)]
    pub delay_slots: u32,
    /// Guard latency shared by every guard of the machine.
    #[serde(default = "ControlUnitDesc::default_global_guard_latency")]
    pub global_guard_latency: u32,
    /// Name of the port that triggers jumps and calls.
    #[serde(default = "ControlUnitDesc::default_trigger_port")]
    pub trigger_port: String,
    /// Name of the return address port.
    #[serde(default = "ControlUnitDesc::default_return_address_port")]
    pub return_address_port: String,
    /// Width of the address ports.
    #[serde(default = "ControlUnitDesc::default_address_width")]
    pub address_width: u32,
    /// Supported control operations (`jump`, `call`).
    #[serde(default = "ControlUnitDesc::default_operations")]
    pub operations: Vec<String>,
}

impl ControlUnitDesc {
    fn default_global_guard_latency() -> u32 {
        1
    }

    fn default_trigger_port() -> String {
        "pc".to_string()
    }

    fn default_return_address_port() -> String {
        "ra".to_string()
    }

    const fn default_address_width() -> u32 {
        DEFAULT_ADDRESS_WIDTH
    }

    fn default_operations() -> Vec<String> {
        vec!["jump".to_string(), "call".to_string()]
    }
}

impl Default for ControlUnitDesc {
    fn default() -> Self {
        Self {
            name: "gcu".to_string(),
            delay_slots: 0,
            global_guard_latency: Self::default_global_guard_latency(),
            trigger_port: Self::default_trigger_port(),
            return_address_port: Self::default_return_address_port(),
            address_width: Self::default_address_width(),
            operations: Self::default_operations(),
        }
    }
}
