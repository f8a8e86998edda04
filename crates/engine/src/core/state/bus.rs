//! Transport bus state.

use crate::common::SimValue;

/// Value carried by one bus in the current cycle.
#[derive(Debug, Clone)]
pub struct BusState {
    name: String,
    width: u32,
    immediate_width: u32,
    sign_extends: bool,
    value: SimValue,
    squashed: bool,
}

impl BusState {
    /// Creates an idle bus.
    pub fn new(name: &str, width: u32, immediate_width: u32, sign_extends: bool) -> Self {
        Self {
            name: name.to_string(),
            width,
            immediate_width,
            sign_extends,
            value: SimValue::zero(width),
            squashed: false,
        }
    }

    /// Returns the bus name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the data width in bits.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Returns the short immediate width in bits.
    pub const fn immediate_width(&self) -> u32 {
        self.immediate_width
    }

    /// Returns `true` if short immediates are sign-extended.
    pub const fn sign_extends(&self) -> bool {
        self.sign_extends
    }

    /// Returns the value transported this cycle.
    pub const fn value(&self) -> SimValue {
        self.value
    }

    /// Returns `true` if this cycle's move was squashed by its guard.
    pub const fn is_squashed(&self) -> bool {
        self.squashed
    }

    /// Places a value on the bus, truncated to the bus width.
    pub fn set_value(&mut self, value: SimValue) {
        self.value = value.with_width(self.width);
        self.squashed = false;
    }

    /// Marks the bus squashed for this cycle.
    pub const fn squash(&mut self) {
        self.squashed = true;
    }

    /// Clears the value and squash flag at the start of a cycle.
    pub const fn clear(&mut self) {
        self.value = SimValue::zero(self.width);
        self.squashed = false;
    }
}
