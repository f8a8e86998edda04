//! Machine state construction.
//!
//! Turns a [`Machine`] description into a fresh [`MachineState`], resolving
//! every operation against the [`OperationPool`] and every guard against the
//! unit it reads. Any inconsistency is reported as an illegal machine.

use std::collections::HashMap;

use tracing::debug;

use super::MachineState;
use super::bus::BusState;
use super::fu::{BoundOperation, FuState, PortState};
use super::gcu::{ControlOperation, GcuState};
use super::guard::{GuardSource, GuardState};
use super::register_file::{LongImmediateUnitState, RegisterFileState};
use crate::common::SimError;
use crate::common::value::MAX_WIDTH;
use crate::core::units::OperationPool;
use crate::memory::MemorySystem;
use crate::model::machine::{FunctionUnitDesc, Machine, OperationDesc};

fn check_width(what: &str, name: &str, width: u32) -> Result<(), SimError> {
    if width == 0 || width > MAX_WIDTH {
        return Err(SimError::IllegalMachine(format!(
            "{what} '{name}' has unsupported width {width}"
        )));
    }
    Ok(())
}

fn index_names<'a>(
    what: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<HashMap<String, usize>, SimError> {
    let mut index = HashMap::new();
    for (i, name) in names.enumerate() {
        if index.insert(name.to_string(), i).is_some() {
            return Err(SimError::IllegalMachine(format!("duplicate {what} '{name}'")));
        }
    }
    Ok(index)
}

fn bind_operation(
    fu: &FuState,
    desc: &OperationDesc,
    pool: &OperationPool,
) -> Result<BoundOperation, SimError> {
    let context = format!("operation '{}' of '{}'", desc.name, fu.name());
    let def = *pool.lookup(&desc.name).ok_or_else(|| {
        SimError::IllegalMachine(format!("{context} is not in the operation pool"))
    })?;
    if desc.latency == 0 {
        return Err(SimError::IllegalMachine(format!("{context} has zero latency")));
    }
    let operands = def.inputs + def.outputs;
    let mut ports = vec![None; operands];
    for binding in &desc.bindings {
        let slot = match binding.operand.checked_sub(1) {
            Some(i) if i < operands => &mut ports[i],
            _ => {
                return Err(SimError::IllegalMachine(format!(
                    "{context} binds nonexistent operand {}",
                    binding.operand
                )));
            }
        };
        let port = fu
            .port_index(&binding.port)
            .map_err(|e| e.into_illegal_machine(&context))?;
        *slot = Some(port);
    }
    let ports = ports
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            p.ok_or_else(|| {
                SimError::IllegalMachine(format!("{context} leaves operand {} unbound", i + 1))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if def.inputs > 0
        && !ports[..def.inputs]
            .iter()
            .any(|p| fu.port(*p).is_some_and(PortState::is_triggering))
    {
        return Err(SimError::IllegalMachine(format!(
            "{context} has no input bound to a triggering port"
        )));
    }
    Ok(BoundOperation {
        def,
        latency: desc.latency,
        inputs: ports[..def.inputs].to_vec(),
        outputs: ports[def.inputs..].to_vec(),
    })
}

fn build_function_unit(
    desc: &FunctionUnitDesc,
    pool: &OperationPool,
    memory: &MemorySystem,
) -> Result<FuState, SimError> {
    let _ = index_names("port", desc.ports.iter().map(|p| p.name.as_str()))?;
    for port in &desc.ports {
        check_width("port", &format!("{}.{}", desc.name, port.name), port.width)?;
    }
    if desc.ports.iter().filter(|p| p.triggering).count() > 1 {
        return Err(SimError::IllegalMachine(format!(
            "function unit '{}' has more than one triggering port",
            desc.name
        )));
    }
    let address_space = desc
        .address_space
        .as_deref()
        .map(|space| memory.index_of(space))
        .transpose()
        .map_err(|e| e.into_illegal_machine(&format!("function unit '{}'", desc.name)))?;
    let ports = desc
        .ports
        .iter()
        .map(|p| PortState::new(&p.name, p.width, p.triggering))
        .collect();
    let mut fu = FuState::new(&desc.name, ports, address_space);
    for op in &desc.operations {
        let bound = bind_operation(&fu, op, pool)?;
        if fu.operation_index(bound.def.name).is_ok() {
            return Err(SimError::IllegalMachine(format!(
                "function unit '{}' implements '{}' twice",
                desc.name, op.name
            )));
        }
        fu.add_operation(bound);
    }
    Ok(fu)
}

impl MachineState {
    /// Builds fresh state for `machine`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::IllegalMachine`] for duplicate names, unsupported
    /// widths, operations missing from `pool`, zero-latency operations,
    /// incomplete operand bindings, or guards reading nonexistent units.
    pub fn build(machine: &Machine, pool: &OperationPool) -> Result<Self, SimError> {
        let memory = MemorySystem::new(&machine.address_spaces)?;

        for bus in &machine.buses {
            check_width("bus", &bus.name, bus.width)?;
        }
        let buses: Vec<BusState> = machine
            .buses
            .iter()
            .map(|b| BusState::new(&b.name, b.width, b.immediate_width, b.sign_extends))
            .collect();
        let bus_index = index_names("bus", machine.buses.iter().map(|b| b.name.as_str()))?;

        let cu = &machine.control_unit;
        if machine.function_units.iter().any(|f| f.name == cu.name) {
            return Err(SimError::IllegalMachine(format!(
                "function unit '{}' shadows the control unit",
                cu.name
            )));
        }
        let function_units = machine
            .function_units
            .iter()
            .map(|f| build_function_unit(f, pool, &memory))
            .collect::<Result<Vec<_>, _>>()?;
        let fu_index = index_names(
            "function unit",
            machine.function_units.iter().map(|f| f.name.as_str()),
        )?;

        for rf in &machine.register_files {
            check_width("register file", &rf.name, rf.width)?;
        }
        let register_files: Vec<RegisterFileState> = machine
            .register_files
            .iter()
            .map(|r| RegisterFileState::new(&r.name, r.size, r.width))
            .collect();
        let rf_index = index_names(
            "register file",
            machine.register_files.iter().map(|r| r.name.as_str()),
        )?;

        for iu in &machine.immediate_units {
            check_width("immediate unit", &iu.name, iu.width)?;
        }
        let immediate_units = machine
            .immediate_units
            .iter()
            .map(|u| LongImmediateUnitState::new(&u.name, u.size, u.width, u.latency))
            .collect();
        let iu_index = index_names(
            "immediate unit",
            machine.immediate_units.iter().map(|u| u.name.as_str()),
        )?;

        check_width("control unit", &cu.name, cu.address_width)?;
        if cu.trigger_port == cu.return_address_port {
            return Err(SimError::IllegalMachine(format!(
                "control unit '{}' uses '{}' as both trigger and return address port",
                cu.name, cu.trigger_port
            )));
        }
        let operations = cu
            .operations
            .iter()
            .map(|name| {
                ControlOperation::parse(name).ok_or_else(|| {
                    SimError::IllegalMachine(format!(
                        "control unit '{}' implements unknown operation '{name}'",
                        cu.name
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let gcu = GcuState::new(
            &cu.name,
            (&cu.trigger_port, &cu.return_address_port),
            cu.delay_slots,
            cu.address_width,
            operations,
        );

        let mut state = Self {
            buses,
            bus_index,
            function_units,
            fu_index,
            register_files,
            rf_index,
            immediate_units,
            iu_index,
            guards: Vec::new(),
            gcu,
            memory,
            finished: false,
        };

        for (bus, desc) in machine.buses.iter().enumerate() {
            for guard in &desc.guards {
                let context = format!("guard on bus '{}'", desc.name);
                let source = state
                    .resolve_guard_source(&guard.target)
                    .map_err(|e| e.into_illegal_machine(&context))?;
                let latency = match source {
                    GuardSource::Register { file, .. } => {
                        cu.global_guard_latency + machine.register_files[file].guard_latency
                    }
                    GuardSource::Port { .. } => cu.global_guard_latency,
                    GuardSource::Unconditional => 0,
                };
                if state.guard_index(bus, source, guard.inverted).is_ok() {
                    return Err(SimError::IllegalMachine(format!(
                        "duplicate {context}"
                    )));
                }
                state
                    .guards
                    .push(GuardState::new(bus, source, guard.inverted, latency));
            }
        }

        state.reset(0);
        debug!(
            machine = %machine.name,
            buses = state.buses.len(),
            function_units = state.function_units.len(),
            register_files = state.register_files.len(),
            guards = state.guards.len(),
            "machine state built"
        );
        Ok(state)
    }
}
