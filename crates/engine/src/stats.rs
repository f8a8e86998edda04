//! Simulation statistics collection and reporting.
//!
//! This module tracks what a simulation session has done. It provides:
//! 1. **Cycles:** Simulated cycles and the host time spent simulating them.
//! 2. **Instructions:** Explicit and implicit instructions executed.
//! 3. **Transports:** Moves executed and moves squashed by their guard.
//! 4. **Runtime errors:** Minor and fatal runtime errors raised by the program.
//! 5. **Utilization:** Per-unit bus writes, register file accesses, and function unit operations.

use std::fmt;
use std::time::Instant;

use crate::core::state::bus::BusState;
use crate::core::state::fu::FuState;
use crate::core::state::guard::{GuardSource, GuardState};
use crate::core::state::register_file::RegisterFileState;
use crate::core::state::{MachineState, StateRef};
use crate::sim::executable::{ExecutableMove, ExecutionOutcome, MoveSource};

/// Section names for selective stats output.
///
/// Valid section identifiers: `"summary"`, `"transport"`, `"errors"`, `"utilization"`.
/// Pass an empty slice to `print_sections` to print all sections.
pub const STATS_SECTIONS: &[&str] = &["summary", "transport", "errors", "utilization"];

/// Named counters for one class of units, indexed like the machine state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct UnitCounters {
    names: Vec<String>,
    counts: Vec<u64>,
}

impl UnitCounters {
    fn new<'a>(names: impl Iterator<Item = &'a str>) -> Self {
        let names: Vec<String> = names.map(str::to_string).collect();
        Self {
            counts: vec![0; names.len()],
            names,
        }
    }

    fn bump(&mut self, index: usize) {
        if let Some(count) = self.counts.get_mut(index) {
            *count += 1;
        }
    }

    fn get(&self, name: &str) -> u64 {
        self.names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .map_or(0, |i| self.counts[i])
    }

    fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.names.iter().map(String::as_str).zip(self.counts.iter().copied())
    }
}

/// How often each bus, register file, and function unit was used.
///
/// Guarded moves count a register read for a register guard even when
/// squashed; everything else counts only executed moves. Unknown names
/// read as zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UtilizationStats {
    bus_writes: UnitCounters,
    register_reads: UnitCounters,
    register_writes: UnitCounters,
    triggers: UnitCounters,
    operations: Vec<UnitCounters>,
}

impl UtilizationStats {
    /// Creates zeroed counters for every unit of `state`.
    pub fn for_machine(state: &MachineState) -> Self {
        let rf_names = || state.register_files().iter().map(RegisterFileState::name);
        let operation_names = |fu: &FuState| {
            let names = (0..).map_while(|i| fu.operation(i)).map(|op| op.def.name);
            UnitCounters::new(names)
        };
        Self {
            bus_writes: UnitCounters::new(state.buses().iter().map(BusState::name)),
            register_reads: UnitCounters::new(rf_names()),
            register_writes: UnitCounters::new(rf_names()),
            triggers: UnitCounters::new(state.function_units().iter().map(FuState::name)),
            operations: state.function_units().iter().map(operation_names).collect(),
        }
    }

    /// Accounts for the moves of an instruction that has just been transported.
    ///
    /// A move executed unless its bus was squashed this cycle.
    pub fn record_transports(&mut self, moves: &[ExecutableMove], state: &MachineState) {
        for m in moves {
            let guard = m.guard.and_then(|g| state.guards().get(g));
            if let Some(GuardSource::Register { file, .. }) = guard.map(GuardState::source) {
                self.register_reads.bump(file);
            }
            if state.buses().get(m.bus).is_none_or(BusState::is_squashed) {
                continue;
            }
            self.bus_writes.bump(m.bus);
            if let MoveSource::Cell(StateRef::Register { file, .. }) = m.source {
                self.register_reads.bump(file);
            }
            if let StateRef::Register { file, .. } = m.destination {
                self.register_writes.bump(file);
            }
        }
    }

    /// Accounts for the operations triggered this cycle, before they start.
    pub fn record_triggers(&mut self, state: &MachineState) {
        for (index, fu) in state.function_units().iter().enumerate() {
            if !fu.is_triggered() {
                continue;
            }
            self.triggers.bump(index);
            let counters = self.operations.get_mut(index);
            if let (Some(op), Some(counters)) = (fu.latched_operation(), counters) {
                counters.bump(op);
            }
        }
    }

    /// Returns the number of values transported on `bus`.
    pub fn bus_writes(&self, bus: &str) -> u64 {
        self.bus_writes.get(bus)
    }

    /// Returns the number of reads from register file `rf`, guard reads included.
    pub fn register_reads(&self, rf: &str) -> u64 {
        self.register_reads.get(rf)
    }

    /// Returns the number of writes to register file `rf`.
    pub fn register_writes(&self, rf: &str) -> u64 {
        self.register_writes.get(rf)
    }

    /// Returns how often function unit `fu` was triggered.
    pub fn trigger_count(&self, fu: &str) -> u64 {
        self.triggers.get(fu)
    }

    /// Returns how often `operation` was started on any unit.
    pub fn operation_executions(&self, operation: &str) -> u64 {
        self.operations.iter().map(|ops| ops.get(operation)).sum()
    }

    /// Returns how often `operation` was started on function unit `fu`.
    pub fn fu_operation_executions(&self, fu: &str, operation: &str) -> u64 {
        self.triggers
            .names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(fu))
            .and_then(|i| self.operations.get(i))
            .map_or(0, |ops| ops.get(operation))
    }

    fn render(&self, line: &mut impl FnMut(String)) {
        for (name, count) in self.bus_writes.iter() {
            line(format!("  {:<22} {count}", format!("bus.{name}.writes")));
        }
        let registers = self.register_reads.iter().zip(self.register_writes.iter());
        for ((name, reads), (_, writes)) in registers {
            line(format!("  {:<22} {reads}", format!("rf.{name}.reads")));
            line(format!("  {:<22} {writes}", format!("rf.{name}.writes")));
        }
        for ((name, triggers), ops) in self.triggers.iter().zip(&self.operations) {
            line(format!("  {:<22} {triggers}", format!("fu.{name}.triggers")));
            for (op, count) in ops.iter().filter(|(_, c)| *c > 0) {
                line(format!("  {:<22} {count}", format!("fu.{name}.{op}")));
            }
        }
    }
}

/// Counters collected by a simulation controller.
///
/// Reset together with the controller; survives stop and resume.
#[derive(Clone, Debug)]
pub struct SimStats {
    start_time: Instant,
    /// Simulated cycles completed.
    pub cycles: u64,
    /// Explicit instructions executed.
    pub instructions_executed: u64,
    /// Implicit instructions executed.
    pub implicit_instructions_executed: u64,
    /// Moves whose guard let them through.
    pub moves_executed: u64,
    /// Moves squashed by a false guard.
    pub moves_squashed: u64,
    /// Runtime errors that did not stop the run.
    pub minor_runtime_errors: u64,
    /// Runtime errors that stopped the run.
    pub fatal_runtime_errors: u64,
    /// Per-unit activity.
    pub utilization: UtilizationStats,
}

impl Default for SimStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            cycles: 0,
            instructions_executed: 0,
            implicit_instructions_executed: 0,
            moves_executed: 0,
            moves_squashed: 0,
            minor_runtime_errors: 0,
            fatal_runtime_errors: 0,
            utilization: UtilizationStats::default(),
        }
    }
}

impl SimStats {
    /// Creates zeroed counters, with utilization counters for every unit of `state`.
    pub fn for_machine(state: &MachineState) -> Self {
        Self {
            utilization: UtilizationStats::for_machine(state),
            ..Self::default()
        }
    }

    /// Accounts for one executed instruction.
    pub fn record(&mut self, outcome: &ExecutionOutcome, implicit: bool) {
        if implicit {
            self.implicit_instructions_executed += 1;
        } else {
            self.instructions_executed += 1;
        }
        self.moves_executed += u64::from(outcome.moves_executed);
        self.moves_squashed += u64::from(outcome.moves_squashed);
    }

    /// Renders the requested sections.
    ///
    /// # Arguments
    ///
    /// * `sections` - Section names from [`STATS_SECTIONS`], or empty for all.
    pub fn render_sections(&self, sections: &[String]) -> String {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);
        let seconds = self.start_time.elapsed().as_secs_f64();
        let mut out = String::new();
        let mut line = |text: String| {
            out.push_str(&text);
            out.push('\n');
        };

        line("==========================================================".to_string());
        line("TTA CORE SIMULATION STATISTICS".to_string());
        line("==========================================================".to_string());
        if want("summary") {
            let khz = if seconds > 0.0 {
                (self.cycles as f64 / seconds) / 1000.0
            } else {
                0.0
            };
            line(format!("host_seconds             {seconds:.4} s"));
            line(format!("sim_cycles               {}", self.cycles));
            line(format!("sim_freq                 {khz:.2} kHz"));
            line(format!("sim_insts                {}", self.instructions_executed));
            line(format!(
                "sim_implicit_insts       {}",
                self.implicit_instructions_executed
            ));
            line("----------------------------------------------------------".to_string());
        }
        if want("transport") {
            let total = (self.moves_executed + self.moves_squashed).max(1);
            line("TRANSPORTS".to_string());
            line(format!("  moves.executed         {}", self.moves_executed));
            line(format!(
                "  moves.squashed         {} ({:.2}%)",
                self.moves_squashed,
                (self.moves_squashed as f64 / total as f64) * 100.0
            ));
            line("----------------------------------------------------------".to_string());
        }
        if want("errors") {
            line("RUNTIME ERRORS".to_string());
            line(format!("  errors.minor           {}", self.minor_runtime_errors));
            line(format!("  errors.fatal           {}", self.fatal_runtime_errors));
        }
        if want("utilization") {
            if want("errors") {
                line("----------------------------------------------------------".to_string());
            }
            line("UTILIZATION".to_string());
            self.utilization.render(&mut line);
        }
        line("==========================================================".to_string());
        out
    }

    /// Prints the requested sections to stdout.
    pub fn print_sections(&self, sections: &[String]) {
        print!("{}", self.render_sections(sections));
    }

    /// Prints all statistics sections to stdout.
    ///
    /// Equivalent to `print_sections(&[])`.
    pub fn print(&self) {
        self.print_sections(&[]);
    }
}

impl fmt::Display for SimStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_sections(&[]))
    }
}
