//! Guard predicate state.
//!
//! A guard with latency `n` observes its source as it was at the end of the
//! cycle `n` cycles earlier. Latency zero reads the source directly.

use std::collections::VecDeque;

/// Resolved source of a guard predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardSource {
    /// Register `index` of register file `file`.
    Register {
        /// Register file index.
        file: usize,
        /// Register index.
        index: usize,
    },
    /// Port `port` of function unit `unit`.
    Port {
        /// Function unit index.
        unit: usize,
        /// Port index.
        port: usize,
    },
    /// Constant true.
    Unconditional,
}

/// Predicate state of one bus guard.
#[derive(Debug, Clone)]
pub struct GuardState {
    bus: usize,
    source: GuardSource,
    inverted: bool,
    latency: usize,
    history: VecDeque<bool>,
}

impl GuardState {
    /// Creates a guard with an empty history; [`Self::reset`] fills it.
    pub fn new(bus: usize, source: GuardSource, inverted: bool, latency: u32) -> Self {
        let latency = if source == GuardSource::Unconditional {
            0
        } else {
            latency as usize
        };
        Self {
            bus,
            source,
            inverted,
            latency,
            history: VecDeque::with_capacity(latency),
        }
    }

    /// Returns the index of the bus owning this guard.
    pub const fn bus(&self) -> usize {
        self.bus
    }

    /// Returns the predicate source.
    pub const fn source(&self) -> GuardSource {
        self.source
    }

    /// Returns `true` if the predicate is negated.
    pub const fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Returns the guard latency in cycles.
    pub const fn latency(&self) -> usize {
        self.latency
    }

    /// Returns the delayed source value, or `None` for a latency-zero guard.
    pub fn delayed(&self) -> Option<bool> {
        self.history.front().copied()
    }

    /// Records the source value at the end of a cycle.
    pub fn advance_clock(&mut self, sample: bool) {
        if self.latency == 0 {
            return;
        }
        self.history.push_back(sample);
        while self.history.len() > self.latency {
            let _ = self.history.pop_front();
        }
    }

    /// Refills the history with `sample`.
    pub fn reset(&mut self, sample: bool) {
        self.history.clear();
        self.history.resize(self.latency, sample);
    }
}
