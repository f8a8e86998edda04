//! Data memory model.
//!
//! This module models the data address spaces of the simulated core. It provides:
//! 1. **Memory:** One byte-addressed, big-endian address space with buffered writes.
//! 2. **Memory System:** Local and shared memories advanced at separate points of a cycle.
//! 3. **Access Records:** Every load and store, published to observers after each cycle.

/// Collection of the core's address spaces.
pub mod system;

pub use system::MemorySystem;

use crate::common::{RuntimeError, RuntimeErrorKind};
use crate::model::machine::AddressSpaceDesc;

/// Direction of a memory access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    /// Load.
    Read,
    /// Store.
    Write,
}

/// A single load or store performed by an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryAccess {
    /// Address space name.
    pub address_space: String,
    /// First byte address.
    pub address: u64,
    /// Access size in bytes.
    pub size: usize,
    /// Load or store.
    pub kind: AccessKind,
    /// Value loaded or stored.
    pub value: u64,
}

/// One address space.
///
/// Stores are buffered and become visible when the memory's clock advances,
/// so a load in the same cycle as a store observes the old contents.
#[derive(Debug, Clone)]
pub struct Memory {
    name: String,
    start: u64,
    bytes: Vec<u8>,
    shared: bool,
    pending: Vec<(u64, usize, u64)>,
}

impl Memory {
    /// Creates a zero-filled memory covering the given address space.
    pub fn new(desc: &AddressSpaceDesc) -> Self {
        let len = desc.end.saturating_sub(desc.start).saturating_add(1);
        Self {
            name: desc.name.clone(),
            start: desc.start,
            bytes: vec![0; len as usize],
            shared: desc.shared,
            pending: Vec::new(),
        }
    }

    /// Returns the address space name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if the memory is shared between cores.
    pub const fn is_shared(&self) -> bool {
        self.shared
    }

    fn offset(&self, address: u64, size: usize) -> Result<usize, RuntimeError> {
        let offset = address
            .checked_sub(self.start)
            .map(|o| o as usize)
            .filter(|o| o.saturating_add(size) <= self.bytes.len());
        offset.ok_or_else(|| {
            RuntimeError::new(
                RuntimeErrorKind::InvalidMemoryReference,
                format!(
                    "{}-byte access at {address:#x} outside address space '{}'",
                    size, self.name
                ),
            )
        })
    }

    /// Reads `size` bytes at `address` as a big-endian integer.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidMemoryReference` runtime error if the range is outside the address space.
    pub fn read(&self, address: u64, size: usize) -> Result<u64, RuntimeError> {
        let offset = self.offset(address, size)?;
        Ok(self.bytes[offset..offset + size]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// Buffers a big-endian store of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidMemoryReference` runtime error if the range is outside the address space.
    pub fn write(&mut self, address: u64, size: usize, value: u64) -> Result<(), RuntimeError> {
        let _ = self.offset(address, size)?;
        self.pending.push((address, size, value));
        Ok(())
    }

    /// Writes bytes immediately, bypassing the store buffer.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidMemoryReference` runtime error if the range is outside the address space.
    pub fn initialize(&mut self, address: u64, data: &[u8]) -> Result<(), RuntimeError> {
        let offset = self.offset(address, data.len())?;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Commits buffered stores.
    pub fn advance_clock(&mut self) {
        for (address, size, value) in std::mem::take(&mut self.pending) {
            // Range was validated when the store was buffered.
            if let Ok(offset) = self.offset(address, size) {
                for i in 0..size {
                    let shift = 8 * (size - 1 - i);
                    self.bytes[offset + i] = (value >> shift) as u8;
                }
            }
        }
    }

    /// Drops buffered stores.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
