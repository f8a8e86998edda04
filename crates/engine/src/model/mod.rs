//! Immutable inputs: the machine description and the program.

/// Architecture topology.
pub mod machine;
/// Scheduled program.
pub mod program;

pub use machine::Machine;
pub use program::Program;
