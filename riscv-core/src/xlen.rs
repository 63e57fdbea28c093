//! Generalizes the hart core over its register width (RV32 vs. RV64).
//!
//! The source this simulator is modeled on hardcodes a 32-bit unsigned register value. Rather
//! than duplicating the whole core per width, [`Xlen`] carries the handful of associated types
//! and constants every width-sensitive computation needs, and [`Rv32`]/[`Rv64`] are the two
//! concrete instantiations.

use std::fmt::Debug;
use std::hash::Hash;

use static_assertions::assert_eq_size;

/// A register-width family: the unsigned register type, its signed companion, and a
/// double-width type wide enough to hold the full result of a `WIDTH x WIDTH` multiply
/// (used by the `mulh` instruction family).
pub trait Xlen: 'static + Copy + Eq + Debug + Hash + Send + Sync {
    /// `u32` on RV32, `u64` on RV64.
    type Unsigned: Copy
        + Eq
        + Ord
        + Debug
        + Default
        + Hash
        + Send
        + Sync
        + From<u8>
        + TryFrom<u64>
        + Into<u64>;
    /// `i32` on RV32, `i64` on RV64.
    type Signed: Copy + Eq + Ord + Debug + Default;
    /// `u64`/`i64` on RV32, `u128`/`i128` on RV64: wide enough for a full-width multiply.
    type DoubleUnsigned: Copy;
    type DoubleSigned: Copy;

    /// Number of bits in [`Self::Unsigned`].
    const WIDTH: u32;
    /// `Self::Unsigned::MAX`, as a `u64` (always representable: `WIDTH` is at most 64).
    const MASK: u64;
    /// Mask applied to shift amounts (`WIDTH - 1`): 31 on RV32, 63 on RV64.
    const SHIFT_MASK: u32;

    fn to_unsigned(value: u64) -> Self::Unsigned;
    fn to_u64(value: Self::Unsigned) -> u64;
    fn to_signed(value: Self::Unsigned) -> Self::Signed;
    fn from_signed(value: Self::Signed) -> Self::Unsigned;
}

/// RV32: 32-bit integer registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rv32;

impl Xlen for Rv32 {
    type Unsigned = u32;
    type Signed = i32;
    type DoubleUnsigned = u64;
    type DoubleSigned = i64;

    const WIDTH: u32 = 32;
    const MASK: u64 = u32::MAX as u64;
    const SHIFT_MASK: u32 = 31;

    fn to_unsigned(value: u64) -> u32 {
        value as u32
    }

    fn to_u64(value: u32) -> u64 {
        value as u64
    }

    fn to_signed(value: u32) -> i32 {
        value as i32
    }

    fn from_signed(value: i32) -> u32 {
        value as u32
    }
}

/// RV64: 64-bit integer registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rv64;

impl Xlen for Rv64 {
    type Unsigned = u64;
    type Signed = i64;
    type DoubleUnsigned = u128;
    type DoubleSigned = i128;

    const WIDTH: u32 = 64;
    const MASK: u64 = u64::MAX;
    const SHIFT_MASK: u32 = 63;

    fn to_unsigned(value: u64) -> u64 {
        value
    }

    fn to_u64(value: u64) -> u64 {
        value
    }

    fn to_signed(value: u64) -> i64 {
        value as i64
    }

    fn from_signed(value: i64) -> u64 {
        value as u64
    }
}

assert_eq_size!(<Rv32 as Xlen>::DoubleUnsigned, u64);
assert_eq_size!(<Rv64 as Xlen>::DoubleUnsigned, u128);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths() {
        assert_eq!(Rv32::WIDTH, 32);
        assert_eq!(Rv64::WIDTH, 64);
        assert_eq!(Rv32::SHIFT_MASK, 31);
        assert_eq!(Rv64::SHIFT_MASK, 63);
    }

    #[test]
    fn sign_round_trip() {
        let v: u32 = 0xFFFF_FFFF;
        assert_eq!(Rv32::from_signed(Rv32::to_signed(v)), v);
    }
}
