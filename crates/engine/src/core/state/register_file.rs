//! Register file and long immediate unit storage.

use std::collections::VecDeque;

use crate::common::SimValue;

/// Indexed register storage of one register file.
#[derive(Debug, Clone)]
pub struct RegisterFileState {
    name: String,
    width: u32,
    registers: Vec<SimValue>,
}

impl RegisterFileState {
    /// Creates a zeroed register file.
    pub fn new(name: &str, size: usize, width: u32) -> Self {
        Self {
            name: name.to_string(),
            width,
            registers: vec![SimValue::zero(width); size],
        }
    }

    /// Returns the register file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the register width.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Returns the number of registers.
    pub fn size(&self) -> usize {
        self.registers.len()
    }

    /// Returns the value of a register.
    pub fn value(&self, index: usize) -> Option<SimValue> {
        self.registers.get(index).copied()
    }

    /// Writes a register, truncating to the register width.
    ///
    /// Out-of-range indices are ignored; moves are validated at load time.
    pub fn set_value(&mut self, index: usize, value: SimValue) {
        if let Some(reg) = self.registers.get_mut(index) {
            *reg = value.with_width(self.width);
        }
    }
}

#[derive(Debug, Clone)]
struct PendingImmediate {
    remaining: u32,
    index: usize,
    value: SimValue,
}

/// Registers of a long immediate unit plus values still in flight.
#[derive(Debug, Clone)]
pub struct LongImmediateUnitState {
    registers: RegisterFileState,
    latency: u32,
    pending: VecDeque<PendingImmediate>,
}

impl LongImmediateUnitState {
    /// Creates a zeroed immediate unit.
    pub fn new(name: &str, size: usize, width: u32, latency: u32) -> Self {
        Self {
            registers: RegisterFileState::new(name, size, width),
            latency,
            pending: VecDeque::new(),
        }
    }

    /// Returns the unit name.
    pub fn name(&self) -> &str {
        self.registers.name()
    }

    /// Returns the register width.
    pub const fn width(&self) -> u32 {
        self.registers.width()
    }

    /// Returns the number of registers.
    pub fn size(&self) -> usize {
        self.registers.size()
    }

    /// Returns the committed value of a register.
    pub fn value(&self, index: usize) -> Option<SimValue> {
        self.registers.value(index)
    }

    /// Schedules a write that becomes visible after the unit's latency.
    pub fn schedule(&mut self, index: usize, value: SimValue) {
        if self.latency == 0 {
            self.registers.set_value(index, value);
        } else {
            self.pending.push_back(PendingImmediate {
                remaining: self.latency,
                index,
                value,
            });
        }
    }

    /// Ages pending writes and commits those whose latency has elapsed.
    pub fn advance_clock(&mut self) {
        let registers = &mut self.registers;
        self.pending.retain_mut(|p| {
            p.remaining -= 1;
            if p.remaining == 0 {
                registers.set_value(p.index, p.value);
                false
            } else {
                true
            }
        });
    }

    /// Drops writes still in flight.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
