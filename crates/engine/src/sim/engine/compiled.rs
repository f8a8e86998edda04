//! Compiled backend.
//!
//! The instruction memory is split into basic blocks once per load. Every
//! move of every instruction is translated into boxed closures specialised on
//! its source and destination kind, so the per-cycle path performs no
//! `StateRef` matching for the common register and port cases. Blocks are
//! found through a jump table keyed by instruction address; sequential
//! execution inside a block follows a cursor and skips the table.
//!
//! Dispatch still happens one instruction per call: the controller needs
//! cycle resolution for events and stop points.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tracing::debug;

use super::ExecutionEngine;
use crate::common::{InstructionAddress, SimError, SimValue};
use crate::core::state::{MachineState, Opcode, StateRef};
use crate::sim::executable::{
    ExecutableInstruction, ExecutableMove, ExecutionOutcome, MoveSource, ScheduledImmediate,
};
use crate::sim::instruction_memory::InstructionMemory;

type GuardFn = Box<dyn Fn(&MachineState) -> bool>;
type ReadFn = Box<dyn Fn(&MachineState) -> SimValue>;
type WriteFn = Box<dyn Fn(&mut MachineState, SimValue)>;

struct CompiledMove {
    bus: usize,
    guard: Option<GuardFn>,
    read: ReadFn,
    write: WriteFn,
}

impl CompiledMove {
    fn compile(m: &ExecutableMove) -> Self {
        let guard: Option<GuardFn> = m
            .guard
            .map(|g| Box::new(move |s: &MachineState| s.guard_value(g)) as GuardFn);

        let read: ReadFn = match m.source {
            MoveSource::Constant(value) => Box::new(move |_: &MachineState| value),
            MoveSource::Cell(StateRef::Register { file, index }) => {
                Box::new(move |s: &MachineState| {
                    s.register_files[file].value(index).unwrap_or_default()
                })
            }
            MoveSource::Cell(cell) => Box::new(move |s: &MachineState| s.read(cell)),
        };

        let write: WriteFn = match (m.destination, m.opcode) {
            (StateRef::Register { file, index }, _) => {
                Box::new(move |s: &mut MachineState, v: SimValue| {
                    s.register_files[file].set_value(index, v);
                })
            }
            (StateRef::Port { unit, port }, None) => {
                Box::new(move |s: &mut MachineState, v: SimValue| {
                    s.function_units[unit].write_port(port, v, None);
                })
            }
            (StateRef::Port { unit, port }, Some(Opcode::Unit(op))) => {
                Box::new(move |s: &mut MachineState, v: SimValue| {
                    s.function_units[unit].write_port(port, v, Some(op));
                })
            }
            (destination, opcode) => {
                let through_return_address = m.reads_return_address();
                Box::new(move |s: &mut MachineState, v: SimValue| {
                    s.write(destination, v, opcode, through_return_address);
                })
            }
        };

        Self {
            bus: m.bus,
            guard,
            read,
            write,
        }
    }
}

/// The transports of one explicit or implicit instruction.
struct CompiledCycle {
    moves: Vec<CompiledMove>,
    immediates: Vec<ScheduledImmediate>,
    width: u64,
    exit_point: bool,
}

impl CompiledCycle {
    fn compile(instruction: &ExecutableInstruction) -> Self {
        Self {
            moves: instruction.moves().iter().map(CompiledMove::compile).collect(),
            immediates: instruction.immediates().to_vec(),
            width: instruction.width(),
            exit_point: instruction.is_exit_point(),
        }
    }

    /// Guards and sources are all read before any destination is written.
    fn run(&self, state: &mut MachineState) -> ExecutionOutcome {
        let enabled: Vec<bool> = self
            .moves
            .iter()
            .map(|m| m.guard.as_ref().is_none_or(|g| g(state)))
            .collect();
        let mut values = Vec::with_capacity(self.moves.len());
        for (m, on) in self.moves.iter().zip(&enabled) {
            if *on {
                let value = (m.read)(state);
                let bus = &mut state.buses[m.bus];
                bus.set_value(value);
                values.push(Some(bus.value()));
            } else {
                state.buses[m.bus].squash();
                values.push(None);
            }
        }
        let mut outcome = ExecutionOutcome {
            width: self.width,
            exit_point: self.exit_point,
            ..ExecutionOutcome::default()
        };
        for (m, value) in self.moves.iter().zip(values) {
            if let Some(value) = value {
                (m.write)(state, value);
                outcome.moves_executed += 1;
            } else {
                outcome.moves_squashed += 1;
            }
        }
        for imm in &self.immediates {
            state.immediate_units[imm.unit].schedule(imm.index, imm.value);
        }
        outcome
    }
}

struct CompiledInstruction {
    address: InstructionAddress,
    cycle: CompiledCycle,
    implicit: Vec<CompiledCycle>,
}

struct CompiledBlock {
    start: InstructionAddress,
    instructions: Vec<CompiledInstruction>,
}

/// Executes pre-translated basic blocks.
pub struct CompiledEngine {
    memory: InstructionMemory,
    blocks: Vec<CompiledBlock>,
    jump_table: HashMap<InstructionAddress, (usize, usize)>,
    cursor: Option<(usize, usize)>,
    block_entries: u64,
}

impl fmt::Debug for CompiledEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledEngine")
            .field("instructions", &self.memory.instruction_count())
            .field("blocks", &self.blocks.len())
            .field("cursor", &self.cursor)
            .field("block_entries", &self.block_entries)
            .finish_non_exhaustive()
    }
}

impl CompiledEngine {
    /// Compiles `memory` into basic blocks.
    ///
    /// # Arguments
    ///
    /// * `memory` - The resolved program.
    /// * `state` - Machine state the program was resolved against; supplies the delay slot count.
    /// * `entry_points` - Addresses execution may start at, such as the program start and entry.
    pub fn new(
        memory: InstructionMemory,
        state: &MachineState,
        entry_points: &[InstructionAddress],
    ) -> Self {
        let leaders = Self::leaders(&memory, state.gcu().delay_slots(), entry_points);
        let mut blocks: Vec<CompiledBlock> = Vec::new();
        let mut jump_table = HashMap::with_capacity(memory.instruction_count());

        for instruction in memory.iter() {
            let address = instruction.address();
            if blocks.is_empty() || leaders.contains(&address) {
                blocks.push(CompiledBlock {
                    start: address,
                    instructions: Vec::new(),
                });
            }
            let index = blocks.len() - 1;
            let block = &mut blocks[index];
            let _ = jump_table.insert(address, (index, block.instructions.len()));
            block.instructions.push(CompiledInstruction {
                address,
                cycle: CompiledCycle::compile(instruction),
                implicit: memory
                    .implicit_instructions_at(address)
                    .iter()
                    .map(CompiledCycle::compile)
                    .collect(),
            });
        }

        debug!(
            blocks = blocks.len(),
            instructions = memory.instruction_count(),
            "program compiled"
        );
        Self {
            memory,
            blocks,
            jump_table,
            cursor: None,
            block_entries: 0,
        }
    }

    /// Computes the basic-block leaders of `memory`.
    fn leaders(
        memory: &InstructionMemory,
        delay_slots: u32,
        entry_points: &[InstructionAddress],
    ) -> BTreeSet<InstructionAddress> {
        let instructions: Vec<&ExecutableInstruction> = memory.iter().collect();
        let mut leaders: BTreeSet<InstructionAddress> = entry_points.iter().copied().collect();
        leaders.extend(memory.procedure_starts().iter().copied());
        if let Some(first) = instructions.first() {
            let _ = leaders.insert(first.address());
        }
        let slots = delay_slots as usize;

        for (i, instruction) in instructions.iter().enumerate() {
            let next = instructions.get(i + 1);
            if let Some(next) = next {
                if instruction.address().checked_add(instruction.width()) != Some(next.address()) {
                    let _ = leaders.insert(next.address());
                }
            }
            if !instruction.is_control_transfer() {
                continue;
            }
            for m in instruction.moves() {
                if let (StateRef::ControlTrigger, MoveSource::Constant(target)) =
                    (m.destination, m.source)
                {
                    let _ = leaders.insert(target.unsigned());
                }
            }
            if let Some(after) = instructions.get(i + slots + 1) {
                let _ = leaders.insert(after.address());
            }
        }
        leaders
    }

    /// Returns the number of basic blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the start address of the block containing `address`.
    pub fn block_start(&self, address: InstructionAddress) -> Option<InstructionAddress> {
        self.jump_table
            .get(&address)
            .map(|&(block, _)| self.blocks[block].start)
    }

    /// Returns how many times execution entered a block at its first instruction.
    pub const fn block_entries(&self) -> u64 {
        self.block_entries
    }

    fn locate(&self, pc: InstructionAddress) -> Option<(usize, usize)> {
        if let Some((block, offset)) = self.cursor {
            let hit = self.blocks[block]
                .instructions
                .get(offset)
                .is_some_and(|i| i.address == pc);
            if hit {
                return Some((block, offset));
            }
        }
        self.jump_table.get(&pc).copied()
    }
}

impl ExecutionEngine for CompiledEngine {
    fn execute_instruction(
        &mut self,
        pc: InstructionAddress,
        state: &mut MachineState,
    ) -> Result<Option<ExecutionOutcome>, SimError> {
        let Some((block, offset)) = self.locate(pc) else {
            if self.memory.has_instruction_at(pc) {
                return Err(SimError::SimulationExecution(format!(
                    "no compiled code for instruction at {pc:#x}"
                )));
            }
            self.cursor = None;
            return Ok(None);
        };
        if offset == 0 {
            self.block_entries += 1;
        }
        let outcome = self.blocks[block].instructions[offset].cycle.run(state);
        if let Some(instruction) = self.memory.instruction_at_mut(pc) {
            instruction.record_execution();
        }
        self.cursor = Some((block, offset + 1));
        Ok(Some(outcome))
    }

    fn implicit_count(&self, pc: InstructionAddress) -> usize {
        self.jump_table
            .get(&pc)
            .map_or(0, |&(b, o)| self.blocks[b].instructions[o].implicit.len())
    }

    fn execute_implicit(
        &mut self,
        pc: InstructionAddress,
        index: usize,
        state: &mut MachineState,
    ) -> Result<ExecutionOutcome, SimError> {
        let count = self.implicit_count(pc);
        let cycle = self
            .jump_table
            .get(&pc)
            .and_then(|&(b, o)| self.blocks[b].instructions[o].implicit.get(index))
            .ok_or(SimError::OutOfRange {
                what: "implicit instruction",
                index,
                count,
            })?;
        let outcome = cycle.run(state);
        if let Some(instruction) = self.memory.implicit_instructions_at_mut(pc).get_mut(index) {
            instruction.record_execution();
        }
        Ok(outcome)
    }

    fn instruction_memory(&self) -> &InstructionMemory {
        &self.memory
    }

    fn reset(&mut self) {
        self.memory.reset_execution_counts();
        self.cursor = None;
        self.block_entries = 0;
    }
}
