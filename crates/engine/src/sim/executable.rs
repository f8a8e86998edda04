//! Executable instructions.
//!
//! An executable instruction is a program instruction with every name already
//! resolved to machine state indices. Executing it performs one cycle's data
//! transports in two passes: all guards and sources are read first, then all
//! destinations are written, so moves within an instruction never observe
//! each other's writes.

use crate::common::{InstructionAddress, SimValue};
use crate::core::state::{MachineState, Opcode, StateRef};

/// Where a move reads its value from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveSource {
    /// A storage cell.
    Cell(StateRef),
    /// A short immediate, already extended to the bus width.
    Constant(SimValue),
}

/// A resolved data transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutableMove {
    /// Bus index.
    pub bus: usize,
    /// Guard index, `None` if unconditional.
    pub guard: Option<usize>,
    /// Value source.
    pub source: MoveSource,
    /// Value destination.
    pub destination: StateRef,
    /// Operation latched by the write.
    pub opcode: Option<Opcode>,
}

impl ExecutableMove {
    /// Returns `true` if the move executes this cycle.
    pub fn is_enabled(&self, state: &MachineState) -> bool {
        self.guard.is_none_or(|g| state.guard_value(g))
    }

    /// Reads the source value.
    pub fn read(&self, state: &MachineState) -> SimValue {
        match self.source {
            MoveSource::Cell(cell) => state.read(cell),
            MoveSource::Constant(value) => value,
        }
    }

    /// Returns `true` if the value comes from the return address port.
    pub fn reads_return_address(&self) -> bool {
        self.source == MoveSource::Cell(StateRef::ReturnAddress)
    }

    /// Writes `value` to the destination.
    pub fn write(&self, state: &mut MachineState, value: SimValue) {
        state.write(
            self.destination,
            value,
            self.opcode,
            self.reads_return_address(),
        );
    }
}

/// A long immediate written by an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledImmediate {
    /// Immediate unit index.
    pub unit: usize,
    /// Register index.
    pub index: usize,
    /// Value, already sized to the unit width.
    pub value: SimValue,
}

/// Result of executing one instruction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Program counter increment of the instruction.
    pub width: u64,
    /// Whether the instruction ends the program.
    pub exit_point: bool,
    /// Moves whose guard let them through.
    pub moves_executed: u32,
    /// Moves squashed by their guard.
    pub moves_squashed: u32,
}

/// Performs the moves and immediates of one instruction on `state`.
///
/// Returns the executed and squashed move counts.
pub fn transport(
    moves: &[ExecutableMove],
    immediates: &[ScheduledImmediate],
    state: &mut MachineState,
) -> (u32, u32) {
    let enabled: Vec<bool> = moves.iter().map(|m| m.is_enabled(state)).collect();
    let mut values = Vec::with_capacity(moves.len());
    for (m, on) in moves.iter().zip(&enabled) {
        if *on {
            let value = m.read(state);
            let bus = &mut state.buses[m.bus];
            bus.set_value(value);
            values.push(Some(bus.value()));
        } else {
            state.buses[m.bus].squash();
            values.push(None);
        }
    }
    let (mut executed, mut squashed) = (0, 0);
    for (m, value) in moves.iter().zip(values) {
        if let Some(value) = value {
            m.write(state, value);
            executed += 1;
        } else {
            squashed += 1;
        }
    }
    for imm in immediates {
        state.immediate_units[imm.unit].schedule(imm.index, imm.value);
    }
    (executed, squashed)
}

/// One instruction ready for execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutableInstruction {
    address: InstructionAddress,
    width: u64,
    moves: Vec<ExecutableMove>,
    immediates: Vec<ScheduledImmediate>,
    exit_point: bool,
    execution_count: u64,
}

impl ExecutableInstruction {
    /// Creates an instruction.
    pub const fn new(
        address: InstructionAddress,
        width: u64,
        moves: Vec<ExecutableMove>,
        immediates: Vec<ScheduledImmediate>,
        exit_point: bool,
    ) -> Self {
        Self {
            address,
            width,
            moves,
            immediates,
            exit_point,
            execution_count: 0,
        }
    }

    /// Returns the instruction address.
    pub const fn address(&self) -> InstructionAddress {
        self.address
    }

    /// Returns the program counter increment.
    pub const fn width(&self) -> u64 {
        self.width
    }

    /// Returns the moves.
    pub fn moves(&self) -> &[ExecutableMove] {
        &self.moves
    }

    /// Returns the long immediates.
    pub fn immediates(&self) -> &[ScheduledImmediate] {
        &self.immediates
    }

    /// Returns `true` if executing the instruction ends the program.
    pub const fn is_exit_point(&self) -> bool {
        self.exit_point
    }

    /// Marks the instruction as an exit point.
    pub const fn set_exit_point(&mut self, exit: bool) {
        self.exit_point = exit;
    }

    /// Returns how many times the instruction has executed.
    pub const fn execution_count(&self) -> u64 {
        self.execution_count
    }

    /// Returns `true` if the instruction writes the control unit's trigger port.
    pub fn is_control_transfer(&self) -> bool {
        self.moves
            .iter()
            .any(|m| m.destination == StateRef::ControlTrigger)
    }

    pub(crate) const fn record_execution(&mut self) {
        self.execution_count += 1;
    }

    pub(crate) const fn reset_execution_count(&mut self) {
        self.execution_count = 0;
    }

    /// Executes the instruction.
    pub fn execute(&mut self, state: &mut MachineState) -> ExecutionOutcome {
        let (moves_executed, moves_squashed) = transport(&self.moves, &self.immediates, state);
        self.record_execution();
        ExecutionOutcome {
            width: self.width,
            exit_point: self.exit_point,
            moves_executed,
            moves_squashed,
        }
    }
}
