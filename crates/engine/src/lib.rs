//! Transport-triggered processor simulation core.
//!
//! This crate implements a cycle-accurate functional simulator for
//! transport-triggered architectures with the following:
//! 1. **Model:** Machine descriptions and scheduled programs, deserializable from JSON.
//! 2. **Core:** Buses, function units, register files, immediate units, guards, and the control unit.
//! 3. **Memory:** Byte-addressed, big-endian address spaces with buffered stores.
//! 4. **Simulation:** Interpreted and compiled backends behind one cycle controller.
//! 5. **Debugging:** Breakpoints, watches, conditions, and a synchronous event bus.

/// Common types (errors, values, addresses, the shared clock).
pub mod common;
/// Simulator configuration (defaults, enums, hierarchical config structures).
pub mod config;
/// Processor core (machine state, operation executors).
pub mod core;
/// Data memory (address spaces, access records).
pub mod memory;
/// Machine description and program inputs.
pub mod model;
/// Controller, backends, events, and stop points.
pub mod sim;
/// Simulation statistics collection and reporting.
pub mod stats;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// All mutable state of the simulated core.
pub use crate::core::MachineState;
/// Cycle-execution driver for one loaded machine and program.
pub use crate::sim::SimulationController;
/// Simulation session; construct with `Simulator::new` and `load` a program.
pub use crate::sim::Simulator;
