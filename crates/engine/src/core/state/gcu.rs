//! Global control unit state.
//!
//! The control unit owns the program counter. A jump or call written to its
//! trigger port takes effect after the configured number of delay slots; a
//! call also stores the address following the last delay slot in the return
//! address port.

use std::collections::VecDeque;

use crate::common::{InstructionAddress, RuntimeError, RuntimeErrorKind, SimValue};

/// Operation selectable on the control unit's trigger port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlOperation {
    /// Unconditional transfer to the operand address.
    Jump,
    /// Transfer that saves the return address.
    Call,
}

impl ControlOperation {
    /// Parses an operation name, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "jump" => Some(Self::Jump),
            "call" => Some(Self::Call),
            _ => None,
        }
    }
}

/// Kind of a pending control transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferKind {
    /// Plain jump.
    Jump,
    /// Procedure call.
    Call,
    /// Jump through the return address port.
    Return,
}

#[derive(Debug, Clone)]
struct PendingTransfer {
    remaining: u32,
    target: InstructionAddress,
    kind: TransferKind,
}

/// Program counter and control-flow state.
#[derive(Debug, Clone)]
pub struct GcuState {
    name: String,
    trigger_port: String,
    return_address_port: String,
    delay_slots: u32,
    width: u32,
    operations: Vec<ControlOperation>,
    program_counter: InstructionAddress,
    trigger: SimValue,
    return_address: SimValue,
    opcode: Option<ControlOperation>,
    triggered: bool,
    through_return_address: bool,
    pending: VecDeque<PendingTransfer>,
    call_depth: usize,
}

impl GcuState {
    /// Creates a control unit with the given ports, delay slots, and address width.
    pub fn new(
        name: &str,
        (trigger_port, return_address_port): (&str, &str),
        delay_slots: u32,
        width: u32,
        operations: Vec<ControlOperation>,
    ) -> Self {
        Self {
            name: name.to_string(),
            trigger_port: trigger_port.to_string(),
            return_address_port: return_address_port.to_string(),
            delay_slots,
            width,
            operations,
            program_counter: 0,
            trigger: SimValue::zero(width),
            return_address: SimValue::zero(width),
            opcode: None,
            triggered: false,
            through_return_address: false,
            pending: VecDeque::new(),
            call_depth: 0,
        }
    }

    /// Returns the unit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name of the trigger port.
    pub fn trigger_port(&self) -> &str {
        &self.trigger_port
    }

    /// Returns the name of the return address port.
    pub fn return_address_port(&self) -> &str {
        &self.return_address_port
    }

    /// Returns the address port width.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Returns the number of delay slots.
    pub const fn delay_slots(&self) -> u32 {
        self.delay_slots
    }

    /// Returns `true` if the unit implements `op`.
    pub fn supports(&self, op: ControlOperation) -> bool {
        self.operations.contains(&op)
    }

    /// Returns the program counter.
    pub const fn program_counter(&self) -> InstructionAddress {
        self.program_counter
    }

    /// Sets the program counter.
    pub const fn set_program_counter(&mut self, pc: InstructionAddress) {
        self.program_counter = pc;
    }

    /// Returns the value of the trigger port.
    pub const fn trigger_value(&self) -> SimValue {
        self.trigger
    }

    /// Returns the value of the return address port.
    pub const fn return_address(&self) -> SimValue {
        self.return_address
    }

    /// Returns the number of calls not yet returned from.
    pub const fn call_depth(&self) -> usize {
        self.call_depth
    }

    /// Returns `true` if no transfer is triggered or pending.
    pub fn is_idle(&self) -> bool {
        !self.triggered && self.pending.is_empty()
    }

    /// Writes the trigger port.
    ///
    /// `through_return_address` marks a jump whose target was read from the
    /// return address port, which is how procedures return.
    pub fn write_trigger(
        &mut self,
        value: SimValue,
        opcode: Option<ControlOperation>,
        through_return_address: bool,
    ) {
        if opcode.is_some() {
            self.opcode = opcode;
        }
        self.trigger = value.with_width(self.width);
        self.triggered = true;
        self.through_return_address = through_return_address;
    }

    /// Writes the return address port.
    pub fn write_return_address(&mut self, value: SimValue) {
        self.return_address = value.with_width(self.width);
    }

    /// Queues the triggered transfer.
    pub fn end_clock(&mut self, faults: &mut Vec<RuntimeError>) {
        if !self.triggered {
            return;
        }
        self.triggered = false;
        let kind = match self.opcode {
            None => {
                faults.push(RuntimeError::new(
                    RuntimeErrorKind::UnknownOperation,
                    format!("tried to trigger {} without operation code", self.name),
                ));
                return;
            }
            Some(ControlOperation::Call) => TransferKind::Call,
            Some(ControlOperation::Jump) if self.through_return_address => TransferKind::Return,
            Some(ControlOperation::Jump) => TransferKind::Jump,
        };
        self.pending.push_back(PendingTransfer {
            remaining: self.delay_slots + 1,
            target: self.trigger.unsigned(),
            kind,
        });
    }

    /// Ages pending transfers and performs those whose delay slots are over.
    ///
    /// Must run after the program counter was incremented for the cycle.
    pub fn advance_clock(&mut self) {
        for transfer in &mut self.pending {
            transfer.remaining = transfer.remaining.saturating_sub(1);
        }
        while self.pending.front().is_some_and(|t| t.remaining == 0) {
            let Some(transfer) = self.pending.pop_front() else {
                break;
            };
            match transfer.kind {
                TransferKind::Call => {
                    self.return_address = SimValue::new(self.program_counter, self.width);
                    self.call_depth += 1;
                }
                TransferKind::Return => self.call_depth = self.call_depth.saturating_sub(1),
                TransferKind::Jump => {}
            }
            self.program_counter = transfer.target;
        }
    }

    /// Returns to the initial state at `pc`.
    pub fn reset(&mut self, pc: InstructionAddress) {
        self.program_counter = pc;
        self.pending.clear();
        self.triggered = false;
        self.opcode = None;
        self.through_return_address = false;
        self.call_depth = 0;
    }
}
