//! Simulation controller.
//!
//! The controller drives the simulated core one cycle at a time. It provides:
//! 1. **Cycle Execution:** Bus clearing, instruction execution, and the clock phase sequence.
//! 2. **Termination:** Exit-point and fall-off-the-end detection.
//! 3. **Run Control:** `run`, `step`, `next`, and `run_until`, each ending in a stopped or finished state.
//! 4. **Stop Arbitration:** Stop requests from stop points, the stop handle, timeouts, and runtime errors.
//! 5. **Events:** Cycle-end, new-instruction, runtime-error, memory-access, and stopped notifications.
//!
//! Both execution models share this controller; the operation-triggered model
//! only differs in the implicit instructions the program may carry.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use super::builder::ProgramBuilder;
use super::engine::{CompiledEngine, EngineDispatch, ExecutionEngine, InterpretedEngine};
use super::events::{EventBus, EventContext, SimulationEvent, StateView};
use super::instruction_memory::InstructionMemory;
use super::symbols::SymbolTable;
use crate::common::{
    ClockCycleCount, InstructionAddress, RuntimeError, RuntimeErrorReport, Severity, SimError,
    SimValue, SimulationClock,
};
use crate::config::{Backend, Config};
use crate::core::state::MachineState;
use crate::core::units::OperationPool;
use crate::model::{Machine, Program};
use crate::stats::SimStats;

/// Lifecycle state of a controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimulationStatus {
    /// Being constructed.
    Initializing,
    /// Loaded and reset, not yet run.
    Initialized,
    /// A run call is executing.
    Running,
    /// A run call returned; the run can be resumed.
    Stopped,
    /// The program exited. Only `reset` or a reload leaves this state.
    Finished,
}

/// Why a run call returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// A stop point fired.
    Breakpoint,
    /// `step` or `next` completed its count.
    AfterStepping,
    /// `run_until` reached its address.
    AfterUntil,
    /// The configured run timeout elapsed.
    AfterTimeout,
    /// The stop handle was triggered.
    UserRequested,
    /// A fatal runtime error was raised.
    RuntimeError,
}

const NO_REQUEST: u8 = 0;
const USER_REQUEST: u8 = 1;
const TIMEOUT_REQUEST: u8 = 2;

/// Cooperative cancellation flag shared with other threads.
///
/// A request is observed after the cycle in progress completes. Requests
/// made while no run is active are discarded when the next run starts.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    flag: Arc<AtomicU8>,
}

impl StopHandle {
    /// Asks the running simulation to stop.
    pub fn request_stop(&self) {
        self.flag.store(USER_REQUEST, Ordering::Release);
    }

    /// Asks the running simulation to stop because a host timer expired.
    pub fn request_timeout(&self) {
        self.flag.store(TIMEOUT_REQUEST, Ordering::Release);
    }

    /// Returns `true` if a stop is pending.
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire) != NO_REQUEST
    }

    pub(crate) fn take(&self) -> Option<StopReason> {
        match self.flag.swap(NO_REQUEST, Ordering::AcqRel) {
            USER_REQUEST => Some(StopReason::UserRequested),
            TIMEOUT_REQUEST => Some(StopReason::AfterTimeout),
            _ => None,
        }
    }
}

/// Source of elapsed wall-clock time for run timeouts.
pub trait RunTimer {
    /// Marks the start of a run call.
    fn start(&mut self);

    /// Returns the time since the last [`RunTimer::start`].
    fn elapsed(&self) -> Duration;
}

/// [`RunTimer`] backed by [`Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClockTimer {
    started: Option<Instant>,
}

impl RunTimer for WallClockTimer {
    fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    fn elapsed(&self) -> Duration {
        self.started.map_or(Duration::ZERO, |t| t.elapsed())
    }
}

/// Read-only view handed to event listeners.
struct ControllerView<'a> {
    state: &'a MachineState,
    symbols: &'a SymbolTable,
    cycle: ClockCycleCount,
}

impl StateView for ControllerView<'_> {
    fn program_counter(&self) -> InstructionAddress {
        self.state.program_counter()
    }

    fn cycle_count(&self) -> ClockCycleCount {
        self.cycle
    }

    fn value_of(&self, name: &str) -> Option<SimValue> {
        self.symbols.resolve(name).map(|cell| self.state.read(cell))
    }
}

/// Cycle-execution driver for one loaded machine and program.
pub struct SimulationController {
    config: Config,
    state: MachineState,
    engine: EngineDispatch,
    symbols: SymbolTable,
    events: EventBus,
    clock: SimulationClock,
    status: SimulationStatus,
    stop_reasons: Vec<StopReason>,
    stop_requested: bool,
    stop_handle: StopHandle,
    timer: Box<dyn RunTimer>,
    initial_pc: InstructionAddress,
    first_illegal: InstructionAddress,
    last_executed: Option<InstructionAddress>,
    reports: Vec<RuntimeErrorReport>,
    stats: SimStats,
    poisoned: bool,
}

impl fmt::Debug for SimulationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationController")
            .field("status", &self.status)
            .field("cycle", &self.clock.get())
            .field("program_counter", &self.state.program_counter())
            .field("stop_reasons", &self.stop_reasons)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl SimulationController {
    /// Binds a machine and a program and prepares them for simulation.
    ///
    /// # Arguments
    ///
    /// * `machine` - Architecture to simulate.
    /// * `program` - Program to run; every name it uses must exist in `machine`.
    /// * `config` - Session configuration; selects the backend.
    /// * `operations` - Operation executors available to function units.
    /// * `events` - Bus on which the controller announces events.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::IllegalMachine`] if the machine cannot be simulated
    /// and [`SimError::IllegalProgram`] if the program does not fit it.
    pub fn new(
        machine: &Machine,
        program: &Program,
        config: &Config,
        operations: &OperationPool,
        events: EventBus,
    ) -> Result<Self, SimError> {
        let mut state = MachineState::build(machine, operations)?;
        if config.simulation.fu_conflict_detection {
            state.set_fu_conflict_detection(true);
            debug!("function unit resource conflict detection enabled");
        }
        for section in &program.data {
            state
                .memory_mut()
                .load_section(&section.address_space, section.start, &section.bytes)?;
        }
        let memory = ProgramBuilder::new(&state, config).build(program)?;
        let engine = match config.simulation.backend {
            Backend::Interpreted => EngineDispatch::Interpreted(InterpretedEngine::new(memory)),
            Backend::Compiled => {
                let entry_points = [program.start_address, program.entry()];
                EngineDispatch::Compiled(Box::new(CompiledEngine::new(
                    memory,
                    &state,
                    &entry_points,
                )))
            }
        };
        let symbols = SymbolTable::build(&state);

        let mut controller = Self {
            config: config.clone(),
            state,
            engine,
            symbols,
            events,
            clock: SimulationClock::default(),
            status: SimulationStatus::Initializing,
            stop_reasons: Vec::new(),
            stop_requested: false,
            stop_handle: StopHandle::default(),
            timer: Box::new(WallClockTimer::default()),
            initial_pc: program.start_address,
            first_illegal: program.first_illegal_address(),
            last_executed: None,
            reports: Vec::new(),
            stats: SimStats::default(),
            poisoned: false,
        };
        controller.reset();
        info!(
            machine = %machine.name,
            backend = ?config.simulation.backend,
            instructions = controller.engine.instruction_memory().instruction_count(),
            start = controller.initial_pc,
            first_illegal = controller.first_illegal,
            "program loaded"
        );
        Ok(controller)
    }

    // ══════════════════════════════════════════════════════════
    // Run control
    // ══════════════════════════════════════════════════════════

    /// Runs until a stop condition is met.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::SimulationExecution`] if the program has finished,
    /// a run is already active, or a previous run failed internally.
    pub fn run(&mut self) -> Result<(), SimError> {
        self.run_with(|_| {})
    }

    /// Runs `count` cycles, or until another stop condition is met.
    ///
    /// A count of zero steps once.
    ///
    /// # Errors
    ///
    /// See [`Self::run`].
    pub fn step(&mut self, count: u64) -> Result<(), SimError> {
        let count = count.max(1);
        let mut executed = 0;
        self.run_with(|c| {
            executed += 1;
            if executed >= count {
                c.prepare_to_stop(StopReason::AfterStepping);
            }
        })
    }

    /// Like [`Self::step`], but cycles spent inside called procedures are not counted.
    ///
    /// # Errors
    ///
    /// See [`Self::run`].
    pub fn next(&mut self, count: u64) -> Result<(), SimError> {
        let count = count.max(1);
        let depth = self.state.gcu().call_depth();
        let mut executed = 0;
        self.run_with(|c| {
            if c.state.gcu().call_depth() <= depth {
                executed += 1;
            }
            if executed >= count {
                c.prepare_to_stop(StopReason::AfterStepping);
            }
        })
    }

    /// Runs until the program counter reaches `address` after at least one cycle.
    ///
    /// # Errors
    ///
    /// See [`Self::run`].
    pub fn run_until(&mut self, address: InstructionAddress) -> Result<(), SimError> {
        self.run_with(|c| {
            if c.status != SimulationStatus::Finished && c.state.program_counter() == address {
                c.prepare_to_stop(StopReason::AfterUntil);
            }
        })
    }

    /// Rewinds to the program start without reloading.
    ///
    /// Register and data memory contents are kept; pipelines, the control
    /// unit, the clock, execution counts, statistics, and stop reasons are cleared.
    pub fn reset(&mut self) {
        self.state.reset(self.initial_pc);
        self.engine.reset();
        self.clock.rewind();
        self.status = SimulationStatus::Initialized;
        self.stop_reasons.clear();
        self.stop_requested = false;
        self.discard_stale_stop_request();
        self.last_executed = None;
        self.reports.clear();
        self.stats = SimStats::for_machine(&self.state);
        debug!(pc = self.initial_pc, "controller reset");
    }

    /// Records a stop reason and ends the run after the current cycle.
    pub fn prepare_to_stop(&mut self, reason: StopReason) {
        if !self.stop_reasons.contains(&reason) {
            self.stop_reasons.push(reason);
        }
        self.stop_requested = true;
    }

    fn run_with(&mut self, mut after_cycle: impl FnMut(&mut Self)) -> Result<(), SimError> {
        self.begin_run()?;
        while !self.stop_requested {
            if let Err(e) = self.simulate_cycle() {
                self.poisoned = true;
                self.status = SimulationStatus::Stopped;
                error!(error = %e, cycle = self.clock.get(), "simulation aborted");
                return Err(e);
            }
            after_cycle(self);
            self.poll_stop_sources();
        }
        self.end_run();
        Ok(())
    }

    fn begin_run(&mut self) -> Result<(), SimError> {
        if self.poisoned {
            return Err(SimError::SimulationExecution(
                "a previous run failed; reload the program".to_string(),
            ));
        }
        match self.status {
            SimulationStatus::Finished => {
                return Err(SimError::SimulationExecution(
                    "the program has finished; reset to run again".to_string(),
                ));
            }
            SimulationStatus::Running => {
                return Err(SimError::SimulationExecution(
                    "a run is already in progress".to_string(),
                ));
            }
            SimulationStatus::Initializing
            | SimulationStatus::Initialized
            | SimulationStatus::Stopped => {}
        }
        self.stop_reasons.clear();
        self.stop_requested = false;
        self.discard_stale_stop_request();
        self.status = SimulationStatus::Running;
        self.timer.start();
        info!(
            pc = self.state.program_counter(),
            cycle = self.clock.get(),
            "simulation started"
        );
        Ok(())
    }

    /// Drops a stop request made while no run was active.
    fn discard_stale_stop_request(&self) {
        if let Some(reason) = self.stop_handle.take() {
            debug!(?reason, "discarding stop request made outside a run");
        }
    }

    fn end_run(&mut self) {
        if self.status != SimulationStatus::Finished {
            self.status = SimulationStatus::Stopped;
        }
        info!(
            status = ?self.status,
            reasons = ?self.stop_reasons,
            pc = self.state.program_counter(),
            cycle = self.clock.get(),
            "simulation stopped"
        );
        let _ = self.emit(&SimulationEvent::SimulationStopped {
            reasons: &self.stop_reasons,
        });
    }

    fn poll_stop_sources(&mut self) {
        if let Some(reason) = self.stop_handle.take() {
            self.prepare_to_stop(reason);
        }
        if let Some(seconds) = self.config.simulation.timeout_seconds {
            if self.timer.elapsed() >= Duration::from_secs(seconds) {
                warn!(seconds, "run timeout elapsed");
                self.prepare_to_stop(StopReason::AfterTimeout);
            }
        }
    }

    // ══════════════════════════════════════════════════════════
    // Cycle execution
    // ══════════════════════════════════════════════════════════

    /// Simulates one cycle.
    fn simulate_cycle(&mut self) -> Result<(), SimError> {
        let pc = self.state.program_counter();
        self.state.clear_buses();

        let mut exit = false;
        let increment = match self.engine.execute_instruction(pc, &mut self.state)? {
            Some(outcome) => {
                self.last_executed = Some(pc);
                self.stats.record(&outcome, false);
                if let Some(instruction) = self.engine.instruction_memory().instruction_at(pc) {
                    self.stats
                        .utilization
                        .record_transports(instruction.moves(), &self.state);
                }
                exit |= outcome.exit_point;
                outcome.width
            }
            None => {
                trace!(pc, "no instruction; idle cycle");
                1
            }
        };
        if !self.complete_clock(pc, increment)? {
            return Ok(());
        }

        for index in 0..self.engine.implicit_count(pc) {
            let outcome = self.engine.execute_implicit(pc, index, &mut self.state)?;
            self.stats.record(&outcome, true);
            let implicit = self.engine.instruction_memory().implicit_instructions_at(pc);
            if let Some(instruction) = implicit.get(index) {
                self.stats
                    .utilization
                    .record_transports(instruction.moves(), &self.state);
            }
            exit |= outcome.exit_point;
            if !self.complete_clock(pc, 0)? {
                return Ok(());
            }
        }

        let finished = exit || self.state.program_counter() == self.first_illegal;
        if finished {
            self.state.set_finished(true);
            self.status = SimulationStatus::Finished;
            self.stop_requested = true;
            info!(
                pc,
                cycle = self.clock.get(),
                exit_point = exit,
                "program finished"
            );
        }

        self.publish_memory_accesses();
        let cycle = self.clock.get();
        trace!(pc, cycle, "cycle end");
        self.dispatch(&SimulationEvent::CycleEnd { cycle });
        self.clock.increment();
        self.stats.cycles += 1;
        if !finished {
            let address = self.state.program_counter();
            self.dispatch(&SimulationEvent::NewInstruction { address });
        }
        Ok(())
    }

    /// Runs the clock phases after an instruction.
    ///
    /// Returns `false` if a fatal runtime error aborted the cycle.
    fn complete_clock(
        &mut self,
        pc: InstructionAddress,
        increment: u64,
    ) -> Result<bool, SimError> {
        self.stats.utilization.record_triggers(&self.state);
        let mut faults = Vec::new();
        self.state.end_clock(&mut faults);
        if !faults.is_empty() && self.report_runtime_errors(pc, faults) {
            self.publish_memory_accesses();
            self.prepare_to_stop(StopReason::RuntimeError);
            return Ok(false);
        }
        self.state.advance_clock(increment)?;
        Ok(true)
    }

    /// Classifies and publishes runtime errors. Returns `true` if any is fatal.
    fn report_runtime_errors(
        &mut self,
        pc: InstructionAddress,
        faults: Vec<RuntimeError>,
    ) -> bool {
        let mut fatal = false;
        for fault in faults {
            let severity = self.config.runtime_errors.severity_of(fault.kind);
            let report = RuntimeErrorReport {
                severity,
                error: fault.at(pc),
                cycle: self.clock.get(),
            };
            match severity {
                Severity::Minor => {
                    warn!(error = %report.error, pc, cycle = report.cycle, "runtime error");
                    self.stats.minor_runtime_errors += 1;
                }
                Severity::Fatal => {
                    error!(error = %report.error, pc, cycle = report.cycle, "fatal runtime error");
                    self.stats.fatal_runtime_errors += 1;
                    fatal = true;
                }
            }
            self.dispatch(&SimulationEvent::RuntimeError(&report));
            self.reports.push(report);
        }
        fatal
    }

    fn publish_memory_accesses(&mut self) {
        for access in self.state.memory_mut().take_accesses() {
            self.dispatch(&SimulationEvent::MemoryAccess(&access));
        }
    }

    fn emit(&self, event: &SimulationEvent<'_>) -> Vec<StopReason> {
        let view = ControllerView {
            state: &self.state,
            symbols: &self.symbols,
            cycle: self.clock.get(),
        };
        let mut ctx = EventContext::new(&view);
        self.events.handle_event(event, &mut ctx);
        ctx.into_stop_requests()
    }

    fn dispatch(&mut self, event: &SimulationEvent<'_>) {
        for reason in self.emit(event) {
            self.prepare_to_stop(reason);
        }
    }

    // ══════════════════════════════════════════════════════════
    // Accessors
    // ══════════════════════════════════════════════════════════

    /// Returns the lifecycle state.
    pub const fn status(&self) -> SimulationStatus {
        self.status
    }

    /// Returns the number of completed cycles.
    pub fn cycle_count(&self) -> ClockCycleCount {
        self.clock.get()
    }

    /// Returns the program counter.
    pub const fn program_counter(&self) -> InstructionAddress {
        self.state.program_counter()
    }

    /// Returns the address of the most recently executed explicit instruction.
    pub const fn last_executed_instruction(&self) -> Option<InstructionAddress> {
        self.last_executed
    }

    /// Returns the address execution starts at.
    pub const fn first_executed_instruction(&self) -> InstructionAddress {
        self.initial_pc
    }

    /// Returns the program counter value that means the program ran off its end.
    pub const fn first_illegal_instruction(&self) -> InstructionAddress {
        self.first_illegal
    }

    /// Returns the reasons for the last stop.
    pub fn stop_reasons(&self) -> &[StopReason] {
        &self.stop_reasons
    }

    /// Returns the number of recorded stop reasons.
    pub fn stop_reason_count(&self) -> usize {
        self.stop_reasons.len()
    }

    /// Returns the `index`th stop reason.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::OutOfRange`] if `index` is not below [`Self::stop_reason_count`].
    pub fn stop_reason(&self, index: usize) -> Result<StopReason, SimError> {
        self.stop_reasons
            .get(index)
            .copied()
            .ok_or(SimError::OutOfRange {
                what: "stop reason",
                index,
                count: self.stop_reasons.len(),
            })
    }

    /// Returns `true` if the current or last run was asked to stop.
    pub const fn is_stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Returns every runtime error reported since the last reset.
    pub fn runtime_error_reports(&self) -> &[RuntimeErrorReport] {
        &self.reports
    }

    /// Removes and returns the queued runtime error reports.
    pub fn take_runtime_error_reports(&mut self) -> Vec<RuntimeErrorReport> {
        std::mem::take(&mut self.reports)
    }

    /// Returns the statistics.
    pub const fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Returns the machine state.
    pub const fn machine_state(&self) -> &MachineState {
        &self.state
    }

    /// Returns the instruction memory.
    pub fn instruction_memory(&self) -> &InstructionMemory {
        self.engine.instruction_memory()
    }

    /// Returns the execution backend.
    pub const fn engine(&self) -> &EngineDispatch {
        &self.engine
    }

    /// Returns the value of a general-purpose register.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] for an unknown register file and
    /// [`SimError::OutOfRange`] for an index past its size.
    pub fn register_value(&self, file: &str, index: usize) -> Result<SimValue, SimError> {
        let rf = self.state.register_file_state(file)?;
        rf.value(index).ok_or(SimError::OutOfRange {
            what: "register",
            index,
            count: rf.size(),
        })
    }

    /// Returns the value of a long immediate register.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] for an unknown unit and
    /// [`SimError::OutOfRange`] for an index past its size.
    pub fn immediate_unit_register_value(
        &self,
        unit: &str,
        index: usize,
    ) -> Result<SimValue, SimError> {
        let iu = self.state.immediate_unit_state(unit)?;
        iu.value(index).ok_or(SimError::OutOfRange {
            what: "immediate register",
            index,
            count: iu.size(),
        })
    }

    /// Returns the value latched in a function unit port.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the unit or port does not exist.
    pub fn fu_port_value(&self, unit: &str, port: &str) -> Result<SimValue, SimError> {
        Ok(self.state.port_state(port, unit)?.value())
    }

    /// Returns the value a bus carried in the last cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InstanceNotFound`] if the bus does not exist.
    pub fn bus_value(&self, bus: &str) -> Result<SimValue, SimError> {
        Ok(self.state.bus_state(bus)?.value())
    }

    /// Returns the value of a qualified name such as `RF.3` or `bus:B1`.
    pub fn value_of(&self, name: &str) -> Option<SimValue> {
        self.symbols.resolve(name).map(|cell| self.state.read(cell))
    }

    /// Returns the qualified names of the machine.
    pub const fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Returns the shared cycle counter.
    pub fn clock(&self) -> SimulationClock {
        self.clock.clone()
    }

    /// Returns a cancellation handle for the current and future runs.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    /// Returns the event bus.
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Replaces the timer used for run timeouts.
    pub fn set_timer(&mut self, timer: Box<dyn RunTimer>) {
        self.timer = timer;
    }
}
