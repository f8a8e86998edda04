//! Function unit state.
//!
//! A function unit latches operands in its ports. Writing the triggering port
//! starts the latched operation at the end of the cycle; its results reach the
//! output ports once the operation latency has elapsed:
//! 1. **End clock:** Execute triggered operations and queue their results.
//! 2. **Advance clock:** Age the pipeline and commit results that are due.
//!
//! With conflict detection on, starting an operation whose results would
//! reach an output port in the same cycle as those of an earlier operation
//! raises a resource conflict.

use std::collections::{HashMap, VecDeque};

use crate::common::{RuntimeError, RuntimeErrorKind, SimError, SimValue};
use crate::core::units::{OperationContext, OperationDef};
use crate::memory::MemorySystem;

/// Latched value of one function unit port.
#[derive(Debug, Clone)]
pub struct PortState {
    name: String,
    width: u32,
    triggering: bool,
    value: SimValue,
}

impl PortState {
    /// Creates a zeroed port.
    pub fn new(name: &str, width: u32, triggering: bool) -> Self {
        Self {
            name: name.to_string(),
            width,
            triggering,
            value: SimValue::zero(width),
        }
    }

    /// Returns the port name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the port width.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Returns `true` if writing this port triggers an operation.
    pub const fn is_triggering(&self) -> bool {
        self.triggering
    }

    /// Returns the latched value.
    pub const fn value(&self) -> SimValue {
        self.value
    }

    fn set_value(&mut self, value: SimValue) {
        self.value = value.with_width(self.width);
    }
}

/// An operation bound to the ports of a unit.
#[derive(Debug, Clone)]
pub struct BoundOperation {
    /// Executor.
    pub def: OperationDef,
    /// Cycles from trigger to result visibility.
    pub latency: u32,
    /// Ports supplying the inputs, in operand order.
    pub inputs: Vec<usize>,
    /// Ports receiving the results, in operand order.
    pub outputs: Vec<usize>,
}

#[derive(Debug, Clone)]
struct InFlight {
    remaining: u32,
    results: Vec<(usize, SimValue)>,
}

/// State of one function unit.
#[derive(Debug, Clone)]
pub struct FuState {
    name: String,
    ports: Vec<PortState>,
    port_index: HashMap<String, usize>,
    operations: Vec<BoundOperation>,
    operation_index: HashMap<String, usize>,
    address_space: Option<usize>,
    opcode: Option<usize>,
    triggered: bool,
    pipeline: VecDeque<InFlight>,
    detect_conflicts: bool,
}

impl FuState {
    /// Creates a unit with the given ports and no operations.
    pub fn new(name: &str, ports: Vec<PortState>, address_space: Option<usize>) -> Self {
        let port_index = ports
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
        Self {
            name: name.to_string(),
            ports,
            port_index,
            operations: Vec::new(),
            operation_index: HashMap::new(),
            address_space,
            opcode: None,
            triggered: false,
            pipeline: VecDeque::new(),
            detect_conflicts: false,
        }
    }

    /// Binds an operation to the unit.
    pub fn add_operation(&mut self, op: BoundOperation) {
        let _ = self
            .operation_index
            .insert(op.def.name.to_string(), self.operations.len());
        self.operations.push(op);
    }

    /// Returns the unit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the unit's ports.
    pub fn ports(&self) -> &[PortState] {
        &self.ports
    }

    /// Returns the index of a port.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the unit has no such port.
    pub fn port_index(&self, name: &str) -> Result<usize, SimError> {
        self.port_index
            .get(name)
            .copied()
            .ok_or_else(|| SimError::not_found("port", format!("{}.{name}", self.name)))
    }

    /// Returns a port by index.
    pub fn port(&self, index: usize) -> Option<&PortState> {
        self.ports.get(index)
    }

    /// Returns the index of a bound operation, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the unit does not implement the operation.
    pub fn operation_index(&self, name: &str) -> Result<usize, SimError> {
        self.operation_index
            .get(name.to_ascii_lowercase().as_str())
            .copied()
            .ok_or_else(|| SimError::not_found("operation", format!("{}.{name}", self.name)))
    }

    /// Returns a bound operation by index.
    pub fn operation(&self, index: usize) -> Option<&BoundOperation> {
        self.operations.get(index)
    }

    /// Returns `true` if the triggering port was written this cycle.
    pub const fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Returns the index of the operation latched by the last opcode-carrying write.
    pub const fn latched_operation(&self) -> Option<usize> {
        self.opcode
    }

    /// Turns result port conflict detection on or off.
    pub const fn set_conflict_detection(&mut self, on: bool) {
        self.detect_conflicts = on;
    }

    /// Returns `true` if no operation is in flight or pending trigger.
    pub fn is_idle(&self) -> bool {
        !self.triggered && self.pipeline.is_empty()
    }

    /// Writes a port, latching `opcode` if given.
    ///
    /// Writing the triggering port marks the unit triggered for this cycle.
    pub fn write_port(&mut self, port: usize, value: SimValue, opcode: Option<usize>) {
        if let Some(op) = opcode {
            self.opcode = Some(op);
        }
        if let Some(p) = self.ports.get_mut(port) {
            p.set_value(value);
            if p.triggering {
                self.triggered = true;
            }
        }
    }

    /// Starts the triggered operation, if any.
    ///
    /// Faults are pushed to `faults`; the failed operation still occupies the
    /// pipeline and produces zero results.
    pub fn end_clock(&mut self, memory: &mut MemorySystem, faults: &mut Vec<RuntimeError>) {
        if !self.triggered {
            return;
        }
        self.triggered = false;
        let Some(op) = self.opcode.and_then(|i| self.operations.get(i)) else {
            faults.push(RuntimeError::new(
                RuntimeErrorKind::UnknownOperation,
                format!("tried to trigger {} without operation code", self.name),
            ));
            return;
        };
        let inputs: Vec<SimValue> = op.inputs.iter().map(|p| self.ports[*p].value).collect();
        let mut ctx = OperationContext::new(self.address_space.map(|space| (memory, space)));
        let produced = (op.def.behavior)(&inputs, &mut ctx).unwrap_or_else(|e| {
            faults.push(e);
            Vec::new()
        });
        let results = op
            .outputs
            .iter()
            .enumerate()
            .map(|(i, port)| {
                let value = produced
                    .get(i)
                    .copied()
                    .unwrap_or_else(|| SimValue::zero(self.ports[*port].width));
                (*port, value)
            })
            .collect();
        if self.detect_conflicts {
            let collides = self.pipeline.iter().any(|f| {
                f.remaining == op.latency && f.results.iter().any(|(p, _)| op.outputs.contains(p))
            });
            if collides {
                faults.push(RuntimeError::new(
                    RuntimeErrorKind::ResourceConflict,
                    format!(
                        "{} on {} writes its results in the same cycle as an earlier operation",
                        op.def.name, self.name
                    ),
                ));
            }
        }
        self.pipeline.push_back(InFlight {
            remaining: op.latency,
            results,
        });
    }

    /// Ages in-flight operations and commits results that are due.
    pub fn advance_clock(&mut self) {
        let ports = &mut self.ports;
        self.pipeline.retain_mut(|f| {
            f.remaining = f.remaining.saturating_sub(1);
            if f.remaining == 0 {
                for (port, value) in &f.results {
                    ports[*port].set_value(*value);
                }
                false
            } else {
                true
            }
        });
    }

    /// Clears the pipeline, the latched opcode, and every port.
    pub fn reset(&mut self) {
        self.pipeline.clear();
        self.triggered = false;
        self.opcode = None;
        for port in &mut self.ports {
            port.value = SimValue::zero(port.width);
        }
    }
}
