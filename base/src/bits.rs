//! Translation between a chip's port bits and an arbitrary subset of
//! a bus.
//!
//! A port may be wired to a non-contiguous selection of bus lines.
//! `extract_bits` pulls the selected bits out and packs them down to
//! bit 0; `inject_bits` does the reverse.  Both use the position of
//! the lowest set bit of the mask as the shift amount, so a mask like
//! `0b0110_0000` moves data to and from bits 5 and 6.
use std::fmt::Debug;
use std::ops::{BitAnd, BitOr, Not, Shl, Shr};

/// The unsigned word types we map bits between.
pub trait BitWord:
    Copy
    + Debug
    + Eq
    + BitAnd<Output = Self>
    + BitOr<Output = Self>
    + Not<Output = Self>
    + Shl<u32, Output = Self>
    + Shr<u32, Output = Self>
{
    const ZERO: Self;

    fn lowest_set_bit(self) -> u32;

    fn ones(self) -> u32;
}

macro_rules! bit_word {
    ($($t:ty),*) => {
        $(
            impl BitWord for $t {
                const ZERO: Self = 0;

                fn lowest_set_bit(self) -> u32 {
                    self.trailing_zeros()
                }

                fn ones(self) -> u32 {
                    self.count_ones()
                }
            }
        )*
    };
}

bit_word!(u8, u16, u32, u64);

/// Returns the bits of `value` selected by `mask`, shifted down so
/// that the lowest bit of the mask lands on bit 0.  A zero mask
/// selects nothing and yields zero.
#[must_use]
pub fn extract_bits<T: BitWord>(value: T, mask: T) -> T {
    if mask == T::ZERO {
        return T::ZERO;
    }
    (value & mask) >> mask.lowest_set_bit()
}

/// Replaces the bits of `base` selected by `mask` with `data`, where
/// bit 0 of `data` lands on the lowest bit of the mask.  Bits of
/// `data` which fall outside the mask are discarded.  A zero mask
/// yields zero.
#[must_use]
pub fn inject_bits<T: BitWord>(base: T, mask: T, data: T) -> T {
    if mask == T::ZERO {
        return T::ZERO;
    }
    (base & !mask) | ((data << mask.lowest_set_bit()) & mask)
}

#[must_use]
pub fn bit_count<T: BitWord>(value: T) -> u32 {
    value.ones()
}

/// All-ones mask for a word of `width` bits; widths of 64 and over
/// saturate.
#[must_use]
pub const fn width_mask(width: u32) -> u64 {
    if width >= u64::BITS {
        u64::MAX
    } else {
        (1_u64 << width) - 1
    }
}

#[test]
fn test_extract_bits() {
    let cases: &[(u64, u64, u64)] = &[
        (0, 0, 0),
        (1, 1, 1),
        (2, 1, 0),
        (4, 4, 1),
        (8, 4, 0),
        (8, 0b1100, 2),
        (0b1100, 4, 1),
    ];
    for (value, mask, expected) in cases.iter().copied() {
        assert_eq!(
            extract_bits(value, mask),
            expected,
            "extract_bits({value:#b}, {mask:#b})"
        );
    }
}

#[test]
fn test_extract_bits_u8() {
    assert_eq!(extract_bits(0b1010_0000_u8, 0b1110_0000), 0b101);
    assert_eq!(extract_bits(0xFF_u8, 0), 0);
}

#[test]
fn test_inject_bits() {
    assert_eq!(inject_bits(0_u64, 0b0110_0000, 0b11), 0b0110_0000);
    assert_eq!(inject_bits(0xFF_u8, 0b0000_1100, 0b01), 0b1111_0111);
    // Data wider than the mask is cut off.
    assert_eq!(inject_bits(0_u16, 0b0011_0000, 0xFF), 0b0011_0000);
    assert_eq!(inject_bits(0xFFFF_u16, 0, 0xFF), 0);
}

#[test]
fn test_bit_count() {
    assert_eq!(bit_count(0_u8), 0);
    assert_eq!(bit_count(0xF0_u8), 4);
    assert_eq!(bit_count(u64::MAX), 64);
}

#[test]
fn test_width_mask() {
    assert_eq!(width_mask(8), 0xFF);
    assert_eq!(width_mask(16), 0xFFFF);
    assert_eq!(width_mask(32), 0xFFFF_FFFF);
    assert_eq!(width_mask(64), u64::MAX);
}
