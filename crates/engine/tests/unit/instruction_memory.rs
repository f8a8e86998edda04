//! # Instruction Memory Tests
//!
//! Tests for address-indexed storage of executable instructions, implicit
//! instructions, and execution counting.

use ttasim_core::common::SimError;
use ttasim_core::sim::executable::ExecutableInstruction;
use ttasim_core::sim::instruction_memory::InstructionMemory;

use crate::common::builder::program::loop_program;
use crate::common::harness::TestContext;

fn empty(address: u64) -> ExecutableInstruction {
    ExecutableInstruction::new(address, 1, Vec::new(), Vec::new(), false)
}

#[test]
fn test_lookup_by_address() {
    let mut memory = InstructionMemory::new();
    memory.add_instruction(empty(4)).unwrap();
    memory.add_instruction(empty(0)).unwrap();

    assert_eq!(memory.instruction_count(), 2);
    assert!(memory.has_instruction_at(4));
    assert!(!memory.has_instruction_at(2));
    assert!(memory.instruction_at(2).is_none());
    assert_eq!(memory.instruction_at(4).map(|i| i.address()), Some(4));
    let order: Vec<u64> = memory.iter().map(ExecutableInstruction::address).collect();
    assert_eq!(order, vec![0, 4]);
}

#[test]
fn test_duplicate_address_is_rejected() {
    let mut memory = InstructionMemory::new();
    memory.add_instruction(empty(3)).unwrap();
    let err = memory.add_instruction(empty(3)).unwrap_err();
    assert!(matches!(err, SimError::IllegalProgram(_)), "{err}");
    assert_eq!(memory.instruction_count(), 1);
}

#[test]
fn test_implicit_instructions_keep_insertion_order() {
    let mut memory = InstructionMemory::new();
    memory.add_instruction(empty(0)).unwrap();
    assert!(!memory.has_implicit_instructions_at(0));
    assert!(memory.implicit_instructions_at(0).is_empty());

    let implicit = |exit| ExecutableInstruction::new(0, 0, Vec::new(), Vec::new(), exit);
    memory.add_implicit_instruction(0, implicit(false));
    memory.add_implicit_instruction(0, implicit(true));

    assert!(memory.has_implicit_instructions_at(0));
    let exits: Vec<bool> = memory
        .implicit_instructions_at(0)
        .iter()
        .map(ExecutableInstruction::is_exit_point)
        .collect();
    assert_eq!(exits, vec![false, true]);
    assert_eq!(memory.instruction_count(), 1);
}

#[test]
fn test_procedure_starts() {
    let mut memory = InstructionMemory::new();
    memory.add_procedure_start(8);
    memory.add_procedure_start(0);
    memory.add_procedure_start(8);
    let starts: Vec<u64> = memory.procedure_starts().iter().copied().collect();
    assert_eq!(starts, vec![0, 8]);
}

#[test]
fn test_execution_counts_track_runs_and_reset() {
    let mut ctx = TestContext::new(&loop_program());
    ctx.step(6);

    let memory = ctx.controller().instruction_memory();
    assert_eq!(memory.instruction_at(0).unwrap().execution_count(), 3);
    assert_eq!(memory.instruction_at(1).unwrap().execution_count(), 3);

    ctx.sim.reset().unwrap();
    let memory = ctx.controller().instruction_memory();
    assert_eq!(memory.instruction_at(0).unwrap().execution_count(), 0);
    assert_eq!(memory.instruction_count(), 2);
}
