//! Program resolution.
//!
//! Translates a [`Program`] into an [`InstructionMemory`] against a freshly
//! built [`MachineState`]. Every bus, unit, port, register, guard, and
//! operation the program names must exist; the first one that does not is
//! reported as an illegal program and no instruction memory is produced.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::executable::{
    ExecutableInstruction, ExecutableMove, MoveSource, ScheduledImmediate,
};
use super::instruction_memory::InstructionMemory;
use crate::common::{InstructionAddress, SimError, SimValue};
use crate::config::{Config, ExecutionModel};
use crate::core::state::fu::PortState;
use crate::core::state::gcu::ControlOperation;
use crate::core::state::{MachineState, Opcode, StateRef};
use crate::model::program::{Instruction, LongImmediate, Move, Program, Terminal};

/// Resolves programs against one machine state.
#[derive(Debug)]
pub struct ProgramBuilder<'a> {
    state: &'a MachineState,
    config: &'a Config,
}

impl<'a> ProgramBuilder<'a> {
    /// Creates a builder resolving names against `state`.
    pub const fn new(state: &'a MachineState, config: &'a Config) -> Self {
        Self { state, config }
    }

    /// Builds the instruction memory for `program`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::IllegalProgram`] if any reference fails to resolve,
    /// two instructions share an address, an instruction has zero width, one
    /// instruction uses a bus twice, or implicit instructions appear outside
    /// the operation-triggered model.
    pub fn build(&self, program: &Program) -> Result<InstructionMemory, SimError> {
        let mut memory = InstructionMemory::new();
        let exit_start = program
            .procedure(&self.config.simulation.exit_procedure)
            .and_then(|p| p.start());
        let entry = program.procedure_at(program.entry()).map(|p| p.name.as_str());

        for procedure in &program.procedures {
            if let Some(start) = procedure.start() {
                memory.add_procedure_start(start);
            }
            let in_entry = entry == Some(procedure.name.as_str());
            for instruction in &procedure.instructions {
                let mut exec = self.resolve_instruction(instruction)?;
                let returns = exec.moves().iter().any(|m| {
                    m.destination == StateRef::ControlTrigger && m.reads_return_address()
                });
                // Without an exit procedure, returning from the entry procedure ends the run.
                let exit = instruction.exit_point
                    || exit_start == Some(instruction.address)
                    || (exit_start.is_none() && in_entry && returns);
                exec.set_exit_point(exit);
                memory.add_instruction(exec)?;

                if !instruction.implicit.is_empty()
                    && self.config.simulation.execution_model != ExecutionModel::OperationTriggered
                {
                    return Err(SimError::IllegalProgram(format!(
                        "implicit instructions at {:#x} require the operation-triggered model",
                        instruction.address
                    )));
                }
                for implicit in &instruction.implicit {
                    let moves = self.resolve_moves(instruction.address, &implicit.moves)?;
                    memory.add_implicit_instruction(
                        instruction.address,
                        ExecutableInstruction::new(
                            instruction.address,
                            0,
                            moves,
                            Vec::new(),
                            implicit.exit_point,
                        ),
                    );
                }
            }
        }

        if memory.instruction_count() > 0 && !memory.has_instruction_at(program.start_address) {
            warn!(
                start = program.start_address,
                "no instruction at the program start address"
            );
        }
        debug!(
            instructions = memory.instruction_count(),
            procedures = program.procedures.len(),
            "program resolved"
        );
        Ok(memory)
    }

    fn resolve_instruction(
        &self,
        instruction: &Instruction,
    ) -> Result<ExecutableInstruction, SimError> {
        if instruction.width == 0 {
            return Err(SimError::IllegalProgram(format!(
                "instruction at {:#x} has zero width",
                instruction.address
            )));
        }
        let moves = self.resolve_moves(instruction.address, &instruction.moves)?;
        let immediates = instruction
            .immediates
            .iter()
            .map(|imm| self.resolve_immediate(instruction.address, imm))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ExecutableInstruction::new(
            instruction.address,
            instruction.width,
            moves,
            immediates,
            instruction.exit_point,
        ))
    }

    fn resolve_moves(
        &self,
        address: InstructionAddress,
        moves: &[Move],
    ) -> Result<Vec<ExecutableMove>, SimError> {
        let mut used = HashSet::new();
        moves
            .iter()
            .map(|m| {
                let resolved = self.resolve_move(address, m)?;
                if !used.insert(resolved.bus) {
                    return Err(SimError::IllegalProgram(format!(
                        "instruction at {address:#x} uses bus '{}' twice",
                        m.bus
                    )));
                }
                Ok(resolved)
            })
            .collect()
    }

    fn resolve_move(
        &self,
        address: InstructionAddress,
        m: &Move,
    ) -> Result<ExecutableMove, SimError> {
        let context = format!("move at {address:#x}");
        let bus = self
            .state
            .bus_index(&m.bus)
            .map_err(|e| e.into_illegal_program(&context))?;
        let source = self
            .resolve_source(bus, &m.source)
            .map_err(|e| e.into_illegal_program(&context))?;
        let (destination, opcode) = self
            .resolve_destination(&m.destination)
            .map_err(|e| e.into_illegal_program(&context))?;
        let guard = m
            .guard
            .as_ref()
            .map(|g| {
                let source = self.state.resolve_guard_source(&g.target)?;
                self.state.guard_index(bus, source, g.inverted)
            })
            .transpose()
            .map_err(|e| e.into_illegal_program(&context))?;
        Ok(ExecutableMove {
            bus,
            guard,
            source,
            destination,
            opcode,
        })
    }

    fn resolve_register(&self, file: &str, index: usize) -> Result<StateRef, SimError> {
        let rf = self.state.register_file_index(file)?;
        if index >= self.state.register_files()[rf].size() {
            return Err(SimError::not_found("register", format!("{file}.{index}")));
        }
        Ok(StateRef::Register { file: rf, index })
    }

    fn resolve_port(&self, unit: &str, port: &str) -> Result<StateRef, SimError> {
        let gcu = self.state.gcu();
        if unit == gcu.name() {
            return if port == gcu.trigger_port() {
                Ok(StateRef::ControlTrigger)
            } else if port == gcu.return_address_port() {
                Ok(StateRef::ReturnAddress)
            } else {
                Err(SimError::not_found("port", format!("{unit}.{port}")))
            };
        }
        let fu = self.state.fu_index(unit)?;
        let port = self.state.function_units()[fu].port_index(port)?;
        Ok(StateRef::Port { unit: fu, port })
    }

    fn resolve_source(&self, bus: usize, terminal: &Terminal) -> Result<MoveSource, SimError> {
        match terminal {
            Terminal::Register { file, index } => {
                Ok(MoveSource::Cell(self.resolve_register(file, *index)?))
            }
            Terminal::FuPort { unit, port, .. } => {
                Ok(MoveSource::Cell(self.resolve_port(unit, port)?))
            }
            Terminal::Immediate { value } => {
                let bus = &self.state.buses()[bus];
                if bus.immediate_width() == 0 {
                    return Err(SimError::IllegalProgram(format!(
                        "bus '{}' has no short immediate field",
                        bus.name()
                    )));
                }
                let encoded = SimValue::from_signed(*value, bus.immediate_width());
                Ok(MoveSource::Constant(
                    encoded.extend_to(bus.width(), bus.sign_extends()),
                ))
            }
            Terminal::ImmediateRegister { unit, index } => {
                let iu = self.state.immediate_unit_index(unit)?;
                if *index >= self.state.immediate_units()[iu].size() {
                    return Err(SimError::not_found(
                        "immediate register",
                        format!("{unit}.{index}"),
                    ));
                }
                Ok(MoveSource::Cell(StateRef::ImmediateRegister {
                    unit: iu,
                    index: *index,
                }))
            }
        }
    }

    fn resolve_destination(
        &self,
        terminal: &Terminal,
    ) -> Result<(StateRef, Option<Opcode>), SimError> {
        match terminal {
            Terminal::Register { file, index } => Ok((self.resolve_register(file, *index)?, None)),
            Terminal::FuPort {
                unit,
                port,
                operation,
            } => {
                let cell = self.resolve_port(unit, port)?;
                let opcode = match (cell, operation.as_deref()) {
                    (_, None) => None,
                    (StateRef::ControlTrigger, Some(name)) => {
                        let op = ControlOperation::parse(name)
                            .filter(|op| self.state.gcu().supports(*op))
                            .ok_or_else(|| {
                                SimError::not_found("operation", format!("{unit}.{name}"))
                            })?;
                        Some(Opcode::Control(op))
                    }
                    (StateRef::Port { unit: fu, port: p }, Some(name)) => {
                        let fu = &self.state.function_units()[fu];
                        if !fu.port(p).is_some_and(PortState::is_triggering) {
                            return Err(SimError::IllegalProgram(format!(
                                "operation '{name}' selected on operand port {unit}.{port}"
                            )));
                        }
                        Some(Opcode::Unit(fu.operation_index(name)?))
                    }
                    (_, Some(name)) => {
                        return Err(SimError::IllegalProgram(format!(
                            "port {unit}.{port} cannot select operation '{name}'"
                        )));
                    }
                };
                Ok((cell, opcode))
            }
            Terminal::Immediate { .. } | Terminal::ImmediateRegister { .. } => Err(
                SimError::IllegalProgram(format!("{terminal:?} is not a writable destination")),
            ),
        }
    }

    fn resolve_immediate(
        &self,
        address: InstructionAddress,
        imm: &LongImmediate,
    ) -> Result<ScheduledImmediate, SimError> {
        let context = format!("long immediate at {address:#x}");
        let unit = self
            .state
            .immediate_unit_index(&imm.unit)
            .map_err(|e| e.into_illegal_program(&context))?;
        let iu = &self.state.immediate_units()[unit];
        if imm.index >= iu.size() {
            return Err(SimError::IllegalProgram(format!(
                "{context}: register {}.{} out of range",
                imm.unit, imm.index
            )));
        }
        Ok(ScheduledImmediate {
            unit,
            index: imm.index,
            value: SimValue::from_signed(imm.value, iu.width()),
        })
    }
}
