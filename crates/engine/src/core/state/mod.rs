//! Machine state model.
//!
//! This module owns every piece of mutable run state of one simulated core. It provides:
//! 1. **Unit States:** Buses, function units, register files, immediate units, guards, and the control unit.
//! 2. **Lookups:** Name-based accessors that fail with `InstanceNotFound` for units absent from the machine.
//! 3. **Clock Phases:** The end-clock and advance-clock sequence run after each executed instruction.
//!
//! The state is built from scratch for every machine and program load; see [`builder`].

/// Construction of the machine state from a machine description.
pub mod builder;
/// Transport bus state.
pub mod bus;
/// Function unit and port state.
pub mod fu;
/// Control unit state.
pub mod gcu;
/// Guard predicate state.
pub mod guard;
/// Register file and long immediate unit state.
pub mod register_file;

use std::collections::HashMap;

use self::bus::BusState;
use self::fu::{FuState, PortState};
use self::gcu::{ControlOperation, GcuState};
use self::guard::{GuardSource, GuardState};
use self::register_file::{LongImmediateUnitState, RegisterFileState};
use crate::common::{InstructionAddress, RuntimeError, SimError, SimValue};
use crate::memory::MemorySystem;
use crate::model::machine::GuardTarget;

/// Reference to a readable or writable architectural storage cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateRef {
    /// A general-purpose register.
    Register {
        /// Register file index.
        file: usize,
        /// Register index.
        index: usize,
    },
    /// A function unit port.
    Port {
        /// Function unit index.
        unit: usize,
        /// Port index.
        port: usize,
    },
    /// The control unit's trigger port.
    ControlTrigger,
    /// The control unit's return address port.
    ReturnAddress,
    /// A long immediate unit register.
    ImmediateRegister {
        /// Immediate unit index.
        unit: usize,
        /// Register index.
        index: usize,
    },
    /// The value on a bus this cycle.
    Bus(usize),
}

/// Operation code latched by a move into a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// Index of a bound operation of the destination function unit.
    Unit(usize),
    /// Control unit operation.
    Control(ControlOperation),
}

/// All mutable state of one simulated core.
#[derive(Debug, Clone)]
pub struct MachineState {
    pub(crate) buses: Vec<BusState>,
    pub(crate) bus_index: HashMap<String, usize>,
    pub(crate) function_units: Vec<FuState>,
    pub(crate) fu_index: HashMap<String, usize>,
    pub(crate) register_files: Vec<RegisterFileState>,
    pub(crate) rf_index: HashMap<String, usize>,
    pub(crate) immediate_units: Vec<LongImmediateUnitState>,
    pub(crate) iu_index: HashMap<String, usize>,
    pub(crate) guards: Vec<GuardState>,
    pub(crate) gcu: GcuState,
    pub(crate) memory: MemorySystem,
    finished: bool,
}

impl MachineState {
    // ══════════════════════════════════════════════════════════
    // Name lookups
    // ══════════════════════════════════════════════════════════

    /// Returns the index of a bus.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the machine has no such bus.
    pub fn bus_index(&self, name: &str) -> Result<usize, SimError> {
        self.bus_index
            .get(name)
            .copied()
            .ok_or_else(|| SimError::not_found("bus", name))
    }

    /// Returns the state of a bus by name.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the machine has no such bus.
    pub fn bus_state(&self, name: &str) -> Result<&BusState, SimError> {
        Ok(&self.buses[self.bus_index(name)?])
    }

    /// Returns the index of a function unit.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the machine has no such unit.
    pub fn fu_index(&self, name: &str) -> Result<usize, SimError> {
        self.fu_index
            .get(name)
            .copied()
            .ok_or_else(|| SimError::not_found("function unit", name))
    }

    /// Returns the state of a function unit by name.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the machine has no such unit.
    pub fn fu_state(&self, name: &str) -> Result<&FuState, SimError> {
        Ok(&self.function_units[self.fu_index(name)?])
    }

    /// Returns the state of port `port` of function unit `fu`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the unit or the port does not exist.
    pub fn port_state(&self, port: &str, fu: &str) -> Result<&PortState, SimError> {
        let unit = self.fu_state(fu)?;
        let index = unit.port_index(port)?;
        unit.port(index)
            .ok_or_else(|| SimError::not_found("port", format!("{fu}.{port}")))
    }

    /// Returns the index of a register file.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the machine has no such register file.
    pub fn register_file_index(&self, name: &str) -> Result<usize, SimError> {
        self.rf_index
            .get(name)
            .copied()
            .ok_or_else(|| SimError::not_found("register file", name))
    }

    /// Returns the state of a register file by name.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the machine has no such register file.
    pub fn register_file_state(&self, name: &str) -> Result<&RegisterFileState, SimError> {
        Ok(&self.register_files[self.register_file_index(name)?])
    }

    /// Returns the index of a long immediate unit.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the machine has no such unit.
    pub fn immediate_unit_index(&self, name: &str) -> Result<usize, SimError> {
        self.iu_index
            .get(name)
            .copied()
            .ok_or_else(|| SimError::not_found("immediate unit", name))
    }

    /// Returns the state of a long immediate unit by name.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the machine has no such unit.
    pub fn immediate_unit_state(&self, name: &str) -> Result<&LongImmediateUnitState, SimError> {
        Ok(&self.immediate_units[self.immediate_unit_index(name)?])
    }

    /// Returns the index of the guard of bus `bus` with the given source and polarity.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the bus does not provide such a guard.
    pub fn guard_index(
        &self,
        bus: usize,
        source: GuardSource,
        inverted: bool,
    ) -> Result<usize, SimError> {
        self.guards
            .iter()
            .position(|g| g.bus() == bus && g.source() == source && g.is_inverted() == inverted)
            .ok_or_else(|| {
                let bus_name = self.buses.get(bus).map_or("?", BusState::name);
                SimError::not_found(
                    "guard",
                    format!("{}{source:?} on {bus_name}", if inverted { "!" } else { "" }),
                )
            })
    }

    /// Resolves a guard target to the unit state it reads.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the register file, unit, or port does not exist.
    pub fn resolve_guard_source(&self, target: &GuardTarget) -> Result<GuardSource, SimError> {
        match target {
            GuardTarget::Register { file, index } => {
                let rf = self.register_file_index(file)?;
                if *index >= self.register_files[rf].size() {
                    return Err(SimError::not_found("register", format!("{file}.{index}")));
                }
                Ok(GuardSource::Register {
                    file: rf,
                    index: *index,
                })
            }
            GuardTarget::Port { unit, port } => {
                let fu = self.fu_index(unit)?;
                let port = self.function_units[fu].port_index(port)?;
                Ok(GuardSource::Port { unit: fu, port })
            }
            GuardTarget::Unconditional => Ok(GuardSource::Unconditional),
        }
    }

    /// Returns the state of the guard with the given source and polarity on a bus.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the bus or the guard does not exist.
    pub fn guard_state(
        &self,
        bus: &str,
        source: GuardSource,
        inverted: bool,
    ) -> Result<&GuardState, SimError> {
        let index = self.guard_index(self.bus_index(bus)?, source, inverted)?;
        Ok(&self.guards[index])
    }

    // ══════════════════════════════════════════════════════════
    // Indexed access
    // ══════════════════════════════════════════════════════════

    /// Returns every bus.
    pub fn buses(&self) -> &[BusState] {
        &self.buses
    }

    /// Returns every function unit.
    pub fn function_units(&self) -> &[FuState] {
        &self.function_units
    }

    /// Returns every register file.
    pub fn register_files(&self) -> &[RegisterFileState] {
        &self.register_files
    }

    /// Returns every long immediate unit.
    pub fn immediate_units(&self) -> &[LongImmediateUnitState] {
        &self.immediate_units
    }

    /// Returns every guard.
    pub fn guards(&self) -> &[GuardState] {
        &self.guards
    }

    /// Returns the control unit.
    pub const fn gcu(&self) -> &GcuState {
        &self.gcu
    }

    /// Returns the memory system.
    pub const fn memory(&self) -> &MemorySystem {
        &self.memory
    }

    /// Returns the memory system for initialization.
    pub const fn memory_mut(&mut self) -> &mut MemorySystem {
        &mut self.memory
    }

    /// Returns the program counter.
    pub const fn program_counter(&self) -> InstructionAddress {
        self.gcu.program_counter()
    }

    /// Returns `true` once the program has exited.
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Marks the program exited or not.
    pub const fn set_finished(&mut self, finished: bool) {
        self.finished = finished;
    }

    /// Reads a storage cell.
    pub fn read(&self, cell: StateRef) -> SimValue {
        match cell {
            StateRef::Register { file, index } => self.register_files[file]
                .value(index)
                .unwrap_or_default(),
            StateRef::Port { unit, port } => self.function_units[unit]
                .port(port)
                .map(PortState::value)
                .unwrap_or_default(),
            StateRef::ControlTrigger => self.gcu.trigger_value(),
            StateRef::ReturnAddress => self.gcu.return_address(),
            StateRef::ImmediateRegister { unit, index } => self.immediate_units[unit]
                .value(index)
                .unwrap_or_default(),
            StateRef::Bus(bus) => self.buses[bus].value(),
        }
    }

    /// Returns the width of a storage cell.
    pub fn width_of(&self, cell: StateRef) -> u32 {
        match cell {
            StateRef::Register { file, .. } => self.register_files[file].width(),
            StateRef::Port { unit, port } => self.function_units[unit]
                .port(port)
                .map_or(0, PortState::width),
            StateRef::ControlTrigger | StateRef::ReturnAddress => self.gcu.width(),
            StateRef::ImmediateRegister { unit, .. } => self.immediate_units[unit].width(),
            StateRef::Bus(bus) => self.buses[bus].width(),
        }
    }

    /// Writes a storage cell, latching `opcode` into the destination unit.
    ///
    /// Buses and immediate registers are not writable by moves and are left unchanged.
    pub fn write(
        &mut self,
        cell: StateRef,
        value: SimValue,
        opcode: Option<Opcode>,
        through_return_address: bool,
    ) {
        match cell {
            StateRef::Register { file, index } => self.register_files[file].set_value(index, value),
            StateRef::Port { unit, port } => {
                let op = match opcode {
                    Some(Opcode::Unit(op)) => Some(op),
                    _ => None,
                };
                self.function_units[unit].write_port(port, value, op);
            }
            StateRef::ControlTrigger => {
                let op = match opcode {
                    Some(Opcode::Control(op)) => Some(op),
                    _ => None,
                };
                self.gcu.write_trigger(value, op, through_return_address);
            }
            StateRef::ReturnAddress => self.gcu.write_return_address(value),
            StateRef::ImmediateRegister { .. } | StateRef::Bus(_) => {}
        }
    }

    /// Evaluates a guard for the current cycle.
    pub fn guard_value(&self, guard: usize) -> bool {
        let state = &self.guards[guard];
        let raw = state
            .delayed()
            .unwrap_or_else(|| self.sample_guard_source(state.source()));
        raw != state.is_inverted()
    }

    fn sample_guard_source(&self, source: GuardSource) -> bool {
        match source {
            GuardSource::Register { file, index } => {
                self.read(StateRef::Register { file, index }).is_nonzero()
            }
            GuardSource::Port { unit, port } => {
                self.read(StateRef::Port { unit, port }).is_nonzero()
            }
            GuardSource::Unconditional => true,
        }
    }

    // ══════════════════════════════════════════════════════════
    // Clock phases
    // ══════════════════════════════════════════════════════════

    /// Resets every bus value and squash flag.
    pub fn clear_buses(&mut self) {
        self.buses.iter_mut().for_each(BusState::clear);
    }

    /// Turns result port conflict detection on or off for every function unit.
    pub fn set_fu_conflict_detection(&mut self, on: bool) {
        for fu in &mut self.function_units {
            fu.set_conflict_detection(on);
        }
    }

    /// Starts the operations triggered this cycle on every function unit.
    pub fn end_clock_of_all_fu_states(&mut self, faults: &mut Vec<RuntimeError>) {
        for fu in &mut self.function_units {
            fu.end_clock(&mut self.memory, faults);
        }
    }

    /// Commits due results on every function unit.
    pub fn advance_clock_of_all_fu_states(&mut self) {
        self.function_units
            .iter_mut()
            .for_each(FuState::advance_clock);
    }

    /// Samples every guard source into its history.
    pub fn advance_clock_of_all_guard_states(&mut self) {
        for i in 0..self.guards.len() {
            let sample = self.sample_guard_source(self.guards[i].source());
            self.guards[i].advance_clock(sample);
        }
    }

    /// Commits due long immediates.
    pub fn advance_clock_of_all_long_immediate_unit_states(&mut self) {
        self.immediate_units
            .iter_mut()
            .for_each(LongImmediateUnitState::advance_clock);
    }

    /// Clears the pipelines and ports of every function unit.
    pub fn reset_all_fus(&mut self) {
        self.function_units.iter_mut().for_each(FuState::reset);
    }

    /// First half of the clock sequence: start triggered operations.
    ///
    /// Runtime faults are collected in `faults`; the caller decides whether the
    /// cycle may complete.
    pub fn end_clock(&mut self, faults: &mut Vec<RuntimeError>) {
        self.end_clock_of_all_fu_states(faults);
        if !self.gcu.is_idle() {
            self.gcu.end_clock(faults);
        }
    }

    /// Second half of the clock sequence: commit results and move the program counter.
    ///
    /// A zero `pc_increment` advances the clock without moving the program
    /// counter or aging control transfers.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if the program counter overflows.
    pub fn advance_clock(&mut self, pc_increment: u64) -> Result<(), SimError> {
        self.memory.advance_local();
        self.memory.advance_shared();
        self.advance_clock_of_all_fu_states();
        if pc_increment > 0 {
            let pc = self
                .gcu
                .program_counter()
                .checked_add(pc_increment)
                .ok_or_else(|| {
                    SimError::SimulationExecution("program counter overflow".to_string())
                })?;
            self.gcu.set_program_counter(pc);
            if !self.gcu.is_idle() {
                self.gcu.advance_clock();
            }
        }
        self.advance_clock_of_all_guard_states();
        self.advance_clock_of_all_long_immediate_unit_states();
        Ok(())
    }

    /// Rewinds all run state to the start of the program.
    ///
    /// Register and memory contents are kept.
    pub fn reset(&mut self, pc: InstructionAddress) {
        self.clear_buses();
        self.reset_all_fus();
        self.gcu.reset(pc);
        self.immediate_units
            .iter_mut()
            .for_each(LongImmediateUnitState::reset);
        self.memory.reset();
        for i in 0..self.guards.len() {
            let sample = self.sample_guard_source(self.guards[i].source());
            self.guards[i].reset(sample);
        }
        self.finished = false;
    }
}
