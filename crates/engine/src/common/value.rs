//! Width-aware simulated values.
//!
//! Every architectural storage cell (bus, port, register) has a bit width fixed
//! by the machine description. `SimValue` carries the raw bit pattern together
//! with that width so that truncation and extension happen at one place.

use std::fmt;

/// Widest value the simulator models.
pub const MAX_WIDTH: u32 = 64;

/// Returns the mask selecting the low `width` bits.
#[inline]
pub const fn mask(width: u32) -> u64 {
    if width >= MAX_WIDTH {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// A bit pattern of a fixed width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct SimValue {
    bits: u64,
    width: u32,
}

impl SimValue {
    /// Creates a value, truncating `bits` to `width`.
    #[inline]
    pub const fn new(bits: u64, width: u32) -> Self {
        let width = if width > MAX_WIDTH { MAX_WIDTH } else { width };
        Self {
            bits: bits & mask(width),
            width,
        }
    }

    /// Creates a value from a signed integer in two's complement.
    #[inline]
    pub const fn from_signed(value: i64, width: u32) -> Self {
        Self::new(value as u64, width)
    }

    /// Creates an all-zero value.
    #[inline]
    pub const fn zero(width: u32) -> Self {
        Self::new(0, width)
    }

    /// Returns the bit width.
    #[inline]
    pub const fn width(self) -> u32 {
        self.width
    }

    /// Returns the bits zero-extended to 64 bits.
    #[inline]
    pub const fn unsigned(self) -> u64 {
        self.bits
    }

    /// Returns the bits sign-extended from the value's width.
    #[inline]
    pub const fn signed(self) -> i64 {
        if self.width == 0 {
            return 0;
        }
        let shift = MAX_WIDTH - self.width;
        ((self.bits << shift) as i64) >> shift
    }

    /// Returns `true` if any bit is set.
    #[inline]
    pub const fn is_nonzero(self) -> bool {
        self.bits != 0
    }

    /// Reinterprets the value at a new width, zero-extending or truncating.
    #[inline]
    #[must_use]
    pub const fn with_width(self, width: u32) -> Self {
        Self::new(self.bits, width)
    }

    /// Sign-extends (or truncates) the value to a new width.
    #[inline]
    #[must_use]
    pub const fn sign_extend_to(self, width: u32) -> Self {
        Self::from_signed(self.signed(), width)
    }

    /// Extends the value to `width`, sign-extending if `signed` is set.
    #[inline]
    #[must_use]
    pub const fn extend_to(self, width: u32, signed: bool) -> Self {
        if signed {
            self.sign_extend_to(width)
        } else {
            self.with_width(width)
        }
    }
}

impl fmt::Display for SimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}/{}", self.bits, self.width)
    }
}
