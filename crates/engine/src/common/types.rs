//! Shared scalar types and the simulation clock handle.

use std::cell::Cell;
use std::rc::Rc;

/// Address of an instruction in the instruction address space.
pub type InstructionAddress = u64;

/// Number of simulated clock cycles.
pub type ClockCycleCount = u64;

/// Shared, read-mostly view of the controller's cycle counter.
///
/// The controller owns the only writer; stop-point bookkeeping and other
/// observers hold clones to compare stamps against the current cycle.
/// Every rewind to cycle zero starts a new epoch, so a stamp taken before a
/// reset never matches a cycle of the next run.
#[derive(Clone, Debug, Default)]
pub struct SimulationClock(Rc<ClockCells>);

#[derive(Debug, Default)]
struct ClockCells {
    cycles: Cell<ClockCycleCount>,
    epoch: Cell<u64>,
}

impl SimulationClock {
    /// Returns the current cycle count.
    pub fn get(&self) -> ClockCycleCount {
        self.0.cycles.get()
    }

    /// Returns how many times the clock has been rewound.
    pub fn epoch(&self) -> u64 {
        self.0.epoch.get()
    }

    /// Returns the cycle count tagged with the current epoch.
    pub fn stamp(&self) -> (u64, ClockCycleCount) {
        (self.epoch(), self.get())
    }

    pub(crate) fn rewind(&self) {
        self.0.cycles.set(0);
        self.0.epoch.set(self.0.epoch.get() + 1);
    }

    pub(crate) fn increment(&self) {
        self.0.cycles.set(self.0.cycles.get() + 1);
    }
}
