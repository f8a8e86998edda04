//! # Program Loading Tests
//!
//! Tests for resolving programs against machines: the rejection of illegal
//! machines and programs, exit point detection, long immediates, implicit
//! instructions, initialized data, and JSON input.

use rstest::rstest;
use ttasim_core::Simulator;
use ttasim_core::common::SimError;
use ttasim_core::config::{Config, ExecutionModel};
use ttasim_core::model::machine::{GuardTarget, OperandBinding};
use ttasim_core::model::program::{Instruction, Move, Terminal};
use ttasim_core::model::{Machine, Program};
use ttasim_core::sim::SimulationStatus;

use crate::common::builder::machine::{
    MachineBuilder, alu, bus_with_guards, guard, port as port_desc, register_guard,
};
use crate::common::builder::program::{
    ProgramBuilder, add_program, guarded, imm, limm, memory_program, mv, port, reg,
    straight_line_program, trigger,
};
use crate::common::harness::{TestContext, init_tracing};

fn load(machine: &Machine, program: &Program, config: Config) -> Result<(), SimError> {
    init_tracing();
    Simulator::new(config).load(machine, program)
}

fn load_standard(program: &Program) -> Result<(), SimError> {
    load(&MachineBuilder::standard().build(), program, Config::default())
}

// ══════════════════════════════════════════════════════════
// Illegal programs
// ══════════════════════════════════════════════════════════

fn single(moves: Vec<Move>) -> Program {
    ProgramBuilder::new().exit(moves).build()
}

#[rstest]
#[case::unknown_bus(single(vec![mv("B7", imm(1), reg(0))]))]
#[case::unknown_register_file(single(vec![mv("B1", imm(1), Terminal::Register { file: "GPR".to_string(), index: 0 })]))]
#[case::register_out_of_range(single(vec![mv("B1", imm(1), reg(8))]))]
#[case::unknown_port(single(vec![mv("B1", imm(1), port("ALU", "in9"))]))]
#[case::unknown_operation(single(vec![mv("B1", imm(1), trigger("ALU", "in1t", "frobnicate"))]))]
#[case::operation_unsupported_by_unit(single(vec![mv("B1", imm(1), trigger("ALU", "in1t", "ldw"))]))]
#[case::operation_on_operand_port(single(vec![mv("B1", imm(1), trigger("ALU", "in2", "add"))]))]
#[case::immediate_on_bus_without_immediates(single(vec![mv("B3", imm(1), reg(0))]))]
#[case::immediate_destination(single(vec![mv("B1", reg(0), imm(1))]))]
#[case::immediate_register_destination(single(vec![mv("B1", reg(0), limm("IMM", 0))]))]
#[case::unknown_control_operation(single(vec![mv("B1", imm(1), trigger("gcu", "pc", "halt"))]))]
#[case::bus_used_twice(single(vec![mv("B1", imm(1), reg(0)), mv("B1", imm(2), reg(1))]))]
#[case::guard_missing_on_bus(single(vec![guarded(mv("B3", reg(1), reg(0)), GuardTarget::Unconditional, false)]))]
#[case::guard_on_unlisted_register(single(vec![guarded(mv("B1", imm(1), reg(0)), register_guard("RF", 1), false)]))]
#[case::unknown_immediate_unit(ProgramBuilder::new().long_immediate("LIMM", 0, 5).exit(Vec::new()).build())]
#[case::zero_width(ProgramBuilder::new().instruction(Instruction { width: 0, ..Instruction::at(0) }).build())]
#[case::duplicate_address(ProgramBuilder::new().nop().at(0).nop().build())]
#[case::implicit_outside_operation_triggered(ProgramBuilder::new().with_implicit(Vec::new(), vec![vec![mv("B1", imm(1), reg(0))]]).build())]
#[case::data_outside_address_space(ProgramBuilder::new().exit(Vec::new()).data("data", 254, &[1, 2, 3, 4]).build())]
#[case::data_in_unknown_space(ProgramBuilder::new().exit(Vec::new()).data("rom", 0, &[1]).build())]
fn test_illegal_program_is_rejected(#[case] program: Program) {
    let err = load_standard(&program).unwrap_err();
    assert!(matches!(err, SimError::IllegalProgram(_)), "{err}");
}

#[test]
fn test_failed_load_keeps_previous_controller() {
    init_tracing();
    let machine = MachineBuilder::standard().build();
    let mut sim = Simulator::new(Config::default());
    sim.load(&machine, &add_program()).unwrap();

    let bad = single(vec![mv("B7", imm(1), reg(0))]);
    assert!(sim.load(&machine, &bad).is_err());

    assert!(sim.is_loaded());
    sim.run().unwrap();
    assert_eq!(
        sim.controller().unwrap().register_value("RF", 1).unwrap().unsigned(),
        12
    );
}

#[test]
fn test_not_loaded_session_rejects_run_control() {
    let mut sim = Simulator::new(Config::default());
    assert!(!sim.is_loaded());
    assert!(matches!(
        sim.run(),
        Err(SimError::SimulationExecution(_))
    ));
    assert!(sim.controller().is_err());
    assert!(sim.reset().is_err());
}

// ══════════════════════════════════════════════════════════
// Illegal machines
// ══════════════════════════════════════════════════════════

#[rstest]
#[case::duplicate_bus(MachineBuilder::standard().bus(bus_with_guards("B1", Vec::new())))]
#[case::zero_width_bus(MachineBuilder::standard().edit(|m| m.buses[0].width = 0))]
#[case::too_wide_register_file(MachineBuilder::standard().edit(|m| m.register_files[0].width = 65))]
#[case::two_triggering_ports(MachineBuilder::standard().edit(|m| m.function_units[0].ports[1].triggering = true))]
#[case::zero_latency(MachineBuilder::standard().edit(|m| m.function_units[0].operations[0].latency = 0))]
#[case::operation_not_in_pool(MachineBuilder::standard().function_unit(alu("FPU", &["fadd"], 3)))]
#[case::unbound_operand(MachineBuilder::standard().edit(|m| { let _ = m.function_units[0].operations[0].bindings.pop(); }))]
#[case::nonexistent_operand(MachineBuilder::standard().edit(|m| m.function_units[0].operations[0].bindings.push(OperandBinding { operand: 4, port: "in2".to_string() })))]
#[case::no_triggering_input(MachineBuilder::standard().edit(|m| m.function_units[0].ports[0].triggering = false))]
#[case::duplicate_operation(MachineBuilder::standard().edit(|m| { let op = m.function_units[0].operations[0].clone(); m.function_units[0].operations.push(op); }))]
#[case::duplicate_port(MachineBuilder::standard().edit(|m| m.function_units[0].ports.push(port_desc("in2", false))))]
#[case::unknown_address_space(MachineBuilder::standard().edit(|m| m.function_units[1].address_space = Some("rom".to_string())))]
#[case::guard_on_unknown_register_file(MachineBuilder::standard().edit(|m| m.buses[2].guards.push(guard(register_guard("GPR", 0), false))))]
#[case::duplicate_guard(MachineBuilder::standard().edit(|m| m.buses[2].guards = vec![guard(GuardTarget::Unconditional, false); 2]))]
#[case::unit_shadows_control_unit(MachineBuilder::standard().function_unit(alu("gcu", &["add"], 1)))]
#[case::unknown_control_operation(MachineBuilder::standard().edit(|m| m.control_unit.operations.push("halt".to_string())))]
#[case::shared_control_ports(MachineBuilder::standard().edit(|m| m.control_unit.return_address_port = "pc".to_string()))]
#[case::empty_address_space(MachineBuilder::standard().edit(|m| { m.address_spaces[0].start = 10; m.address_spaces[0].end = 5; }))]
fn test_illegal_machine_is_rejected(#[case] machine: MachineBuilder) {
    let err = load(&machine.build(), &straight_line_program(1), Config::default()).unwrap_err();
    assert!(matches!(err, SimError::IllegalMachine(_)), "{err}");
}

// ══════════════════════════════════════════════════════════
// Exit points
// ══════════════════════════════════════════════════════════

#[test]
fn test_falling_off_the_end_finishes() {
    let program = ProgramBuilder::new().nop().nop().build();
    let mut ctx = TestContext::new(&program);
    ctx.run();

    let controller = ctx.controller();
    assert_eq!(controller.status(), SimulationStatus::Finished);
    assert_eq!(controller.first_illegal_instruction(), 2);
    assert_eq!(controller.cycle_count(), 2);
    assert!(controller.machine_state().is_finished());
}

#[test]
fn test_exit_procedure_start_is_an_exit_point() {
    let program = ProgramBuilder::new()
        .moves(vec![mv("B1", imm(2), trigger("gcu", "pc", "jump"))])
        .nop()
        .procedure("_exit")
        .nop()
        .nop()
        .build();
    let mut ctx = TestContext::new(&program);
    ctx.run();

    let controller = ctx.controller();
    assert_eq!(controller.status(), SimulationStatus::Finished);
    assert_eq!(controller.last_executed_instruction(), Some(2));
    assert_eq!(controller.cycle_count(), 2);
}

#[test]
fn test_return_from_entry_procedure_is_an_exit_point() {
    let program = ProgramBuilder::new()
        .nop()
        .moves(vec![mv(
            "B1",
            port("gcu", "ra"),
            trigger("gcu", "pc", "jump"),
        )])
        .nop()
        .build();
    let mut ctx = TestContext::new(&program);
    ctx.run();

    let controller = ctx.controller();
    assert_eq!(controller.status(), SimulationStatus::Finished);
    assert_eq!(controller.last_executed_instruction(), Some(1));
    assert!(controller.instruction_memory().instruction_at(1).unwrap().is_exit_point());
}

#[test]
fn test_empty_address_is_a_no_op_cycle() {
    let program = ProgramBuilder::new()
        .moves(vec![mv("B1", imm(3), reg(1))])
        .at(4)
        .exit(vec![mv("B1", imm(4), reg(2))])
        .build();
    let mut ctx = TestContext::new(&program);
    ctx.run();

    assert_eq!(ctx.reg(1), 3);
    assert_eq!(ctx.reg(2), 4);
    let controller = ctx.controller();
    assert_eq!(controller.cycle_count(), 5);
    assert_eq!(controller.stats().instructions_executed, 2);
}

// ══════════════════════════════════════════════════════════
// Immediates, implicit instructions, data
// ══════════════════════════════════════════════════════════

#[rstest]
#[case::negative(-1, 0xFFFF_FFFF)]
#[case::wide(100_000, 100_000)]
fn test_long_immediate_reaches_register(#[case] value: i64, #[case] expected: u64) {
    let program = ProgramBuilder::new()
        .long_immediate("IMM", 0, value)
        .moves(vec![mv("B1", limm("IMM", 0), reg(1))])
        .exit(Vec::new())
        .build();
    let mut ctx = TestContext::new(&program);
    ctx.run();

    assert_eq!(ctx.reg(1), expected);
    assert_eq!(
        ctx.controller()
            .immediate_unit_register_value("IMM", 0)
            .unwrap()
            .unsigned(),
        expected
    );
}

#[rstest]
#[case::sign_extended(true, 0xFFFF_FFFF)]
#[case::zero_extended(false, 0xFFFF)]
fn test_short_immediate_extension(#[case] sign_extends: bool, #[case] expected: u64) {
    let machine = MachineBuilder::standard()
        .edit(|m| m.buses[0].sign_extends = sign_extends)
        .build();
    let program = single(vec![mv("B1", imm(-1), reg(1))]);
    let mut ctx = TestContext::with_machine(&machine, &program, Config::default());
    ctx.run();

    assert_eq!(ctx.reg(1), expected);
}

#[test]
fn test_implicit_instructions_run_in_the_same_cycle() {
    let mut config = Config::default();
    config.simulation.execution_model = ExecutionModel::OperationTriggered;
    let program = ProgramBuilder::new()
        .with_implicit(
            vec![mv("B1", imm(3), reg(2))],
            vec![vec![mv("B1", reg(2), reg(3))], vec![mv("B1", reg(3), reg(4))]],
        )
        .exit(Vec::new())
        .build();
    let mut ctx = TestContext::with_machine(&MachineBuilder::standard().build(), &program, config);
    ctx.run();

    assert_eq!(ctx.reg(3), 3);
    assert_eq!(ctx.reg(4), 3);
    let controller = ctx.controller();
    assert_eq!(controller.cycle_count(), 2);
    assert_eq!(controller.stats().instructions_executed, 2);
    assert_eq!(controller.stats().implicit_instructions_executed, 2);
    assert!(controller.instruction_memory().has_implicit_instructions_at(0));
}

#[test]
fn test_data_sections_are_loaded_big_endian() {
    let program = ProgramBuilder::new()
        .moves(vec![mv("B1", imm(8), trigger("LSU", "addr", "ldw"))])
        .moves(vec![mv("B1", port("LSU", "res"), reg(5))])
        .exit(Vec::new())
        .data("data", 8, &[0x12, 0x34, 0x56, 0x78])
        .build();
    let mut ctx = TestContext::new(&program);
    ctx.run();

    assert_eq!(ctx.reg(5), 0x1234_5678);
}

#[test]
fn test_store_is_committed_big_endian() {
    let mut ctx = TestContext::new(&memory_program());
    ctx.run();

    assert_eq!(ctx.reg(4), 16);
    let memory = ctx.controller().machine_state().memory().by_name("data").unwrap();
    assert_eq!(memory.read(64, 4).unwrap(), 16);
    assert_eq!(memory.read(67, 1).unwrap(), 16);
    assert_eq!(memory.read(64, 1).unwrap(), 0);
}

// ══════════════════════════════════════════════════════════
// JSON input
// ══════════════════════════════════════════════════════════

const MACHINE_JSON: &str = r#"{
    "name": "json",
    "buses": [
        { "name": "B1", "width": 32, "immediate_width": 8, "sign_extends": true,
          "guards": [ { "target": { "kind": "Register", "file": "RF", "index": 0 } } ] }
    ],
    "function_units": [
        { "name": "ALU",
          "ports": [ { "name": "a", "width": 32, "triggering": true },
                     { "name": "b", "width": 32 },
                     { "name": "r", "width": 32 } ],
          "operations": [ { "name": "ADD", "latency": 1,
                            "bindings": [ { "operand": 1, "port": "a" },
                                          { "operand": 2, "port": "b" },
                                          { "operand": 3, "port": "r" } ] } ] }
    ],
    "register_files": [ { "name": "RF", "size": 4, "width": 32 } ],
    "control_unit": { "name": "gcu" }
}"#;

const PROGRAM_JSON: &str = r#"{
    "start_address": 0,
    "procedures": [ { "name": "main", "instructions": [
        { "address": 0, "moves": [
            { "bus": "B1", "source": { "kind": "Immediate", "value": 9 },
              "destination": { "kind": "FuPort", "unit": "ALU", "port": "a", "operation": "add" } } ] },
        { "address": 1, "moves": [
            { "bus": "B1", "source": { "kind": "FuPort", "unit": "ALU", "port": "r" },
              "destination": { "kind": "Register", "file": "RF", "index": 3 } } ] },
        { "address": 2, "exit_point": true }
    ] } ]
}"#;

#[test]
fn test_json_machine_and_program() {
    let machine = Machine::from_json(MACHINE_JSON).unwrap();
    let program = Program::from_json(PROGRAM_JSON).unwrap();
    assert_eq!(machine.control_unit.trigger_port, "pc");
    assert_eq!(machine.control_unit.global_guard_latency, 1);
    assert_eq!(program.instruction_count(), 3);
    assert_eq!(program.entry(), 0);

    let mut ctx = TestContext::with_machine(&machine, &program, Config::default());
    ctx.run();

    let controller = ctx.controller();
    assert_eq!(controller.status(), SimulationStatus::Finished);
    assert_eq!(controller.register_value("RF", 3).unwrap().unsigned(), 9);
}

#[test]
fn test_malformed_json_is_rejected() {
    assert!(matches!(
        Machine::from_json(r#"{ "name": "x" }"#),
        Err(SimError::IllegalMachine(_))
    ));
    assert!(matches!(
        Program::from_json(r#"{ "procedures": 3 }"#),
        Err(SimError::IllegalProgram(_))
    ));
}
