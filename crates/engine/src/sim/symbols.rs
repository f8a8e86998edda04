//! Qualified names of architectural storage.
//!
//! Listeners and condition expressions address the machine by name:
//! `RF.3` for a register, `ALU.out1` for a port, `gcu.ra` for the return
//! address, `IMM.0` for a long immediate register, and `bus:B1` for a bus.

use std::collections::HashMap;

use crate::core::state::{MachineState, StateRef};

/// Name to storage cell map, built once per load.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    names: HashMap<String, StateRef>,
}

impl SymbolTable {
    /// Collects every addressable cell of `state`.
    ///
    /// If two cells share a qualified name, the register wins over the port.
    pub fn build(state: &MachineState) -> Self {
        let mut names = HashMap::new();
        for (file, rf) in state.register_files().iter().enumerate() {
            for index in 0..rf.size() {
                let _ = names
                    .entry(format!("{}.{index}", rf.name()))
                    .or_insert(StateRef::Register { file, index });
            }
        }
        for (unit, fu) in state.function_units().iter().enumerate() {
            for (port, p) in fu.ports().iter().enumerate() {
                let _ = names
                    .entry(format!("{}.{}", fu.name(), p.name()))
                    .or_insert(StateRef::Port { unit, port });
            }
        }
        let gcu = state.gcu();
        let _ = names
            .entry(format!("{}.{}", gcu.name(), gcu.trigger_port()))
            .or_insert(StateRef::ControlTrigger);
        let _ = names
            .entry(format!("{}.{}", gcu.name(), gcu.return_address_port()))
            .or_insert(StateRef::ReturnAddress);
        for (unit, iu) in state.immediate_units().iter().enumerate() {
            for index in 0..iu.size() {
                let _ = names
                    .entry(format!("{}.{index}", iu.name()))
                    .or_insert(StateRef::ImmediateRegister { unit, index });
            }
        }
        for (bus, b) in state.buses().iter().enumerate() {
            let _ = names
                .entry(format!("bus:{}", b.name()))
                .or_insert(StateRef::Bus(bus));
        }
        Self { names }
    }

    /// Resolves a qualified name.
    pub fn resolve(&self, name: &str) -> Option<StateRef> {
        self.names.get(name.trim()).copied()
    }

    /// Returns the number of names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if no names are known.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
