//! Conversions between the 8-byte cell representation and native values.
//!
//! Cells are little-endian. Metadata integers (header, thread records, TOC)
//! are big-endian and go through the `read_*_be`/`write_*_be` helpers.

use crate::common::SysVal;

const SIGN_BIT: u64 = 1 << 63;

/// Packs a float into its cell representation.
pub fn pack_f64(value: f64) -> SysVal {
    value.to_bits().to_le_bytes()
}

/// Unpacks a cell into a float.
pub fn unpack_f64(cell: &SysVal) -> f64 {
    f64::from_bits(u64::from_le_bytes(*cell))
}

/// Packs an unsigned integer into its cell representation.
pub fn pack_u64(value: u64) -> SysVal {
    value.to_le_bytes()
}

/// Unpacks a cell into an unsigned integer.
pub fn unpack_u64(cell: &SysVal) -> u64 {
    u64::from_le_bytes(*cell)
}

/// Maps a float onto 8 bytes whose big-endian byte order matches the
/// numeric order of the input.
///
/// The sign bit is flipped; negative values additionally have every other
/// bit flipped so that larger magnitudes sort lower.
pub fn order_preserving_key(value: f64) -> [u8; 8] {
    let bits = value.to_bits();
    let key = if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits ^ SIGN_BIT
    };
    key.to_be_bytes()
}

/// Inverse of [`order_preserving_key`].
pub fn from_order_preserving_key(key: [u8; 8]) -> f64 {
    let key = u64::from_be_bytes(key);
    let bits = if key & SIGN_BIT != 0 {
        key ^ SIGN_BIT
    } else {
        !key
    };
    f64::from_bits(bits)
}

pub(crate) fn read_u32_be(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}

pub(crate) fn write_u32_be(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

pub(crate) fn read_u64_be(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

pub(crate) fn write_u64_be(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}
