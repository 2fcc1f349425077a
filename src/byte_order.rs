//! Helpers for explicit network byte-order conversions.
//!
//! Frame headers mix field widths that `bytes::Buf` does not cover directly
//! (24-bit lengths, 31-bit stream identifiers with a reserved high bit). These
//! helpers keep that bit twiddling in one place so the codec can stay explicit
//! about wire endianness.

/// Largest value representable in a 24-bit length field.
pub const MAX_U24: u32 = 0x00ff_ffff;

/// Mask selecting the 31 usable bits of a stream identifier or window increment.
pub const U31_MASK: u32 = 0x7fff_ffff;

/// Serialise the low 24 bits of `value` in network byte order.
///
/// # Examples
///
/// ```
/// use muxwire::byte_order::write_network_u24;
///
/// assert_eq!(write_network_u24(0x12_3456), [0x12, 0x34, 0x56]);
/// ```
#[must_use]
pub fn write_network_u24(value: u32) -> [u8; 3] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    let [_, hi, mid, lo] = (value & MAX_U24).to_be_bytes();
    [hi, mid, lo]
}

/// Parse a network-order 24-bit unsigned integer.
///
/// # Examples
///
/// ```
/// use muxwire::byte_order::read_network_u24;
///
/// assert_eq!(read_network_u24([0x12, 0x34, 0x56]), 0x12_3456);
/// ```
#[must_use]
pub fn read_network_u24(bytes: [u8; 3]) -> u32 {
    let [hi, mid, lo] = bytes;
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    let value = u32::from_be_bytes([0, hi, mid, lo]);
    value
}

/// Parse a 31-bit value, discarding the reserved high bit.
///
/// Returns the value and whether the reserved bit was set so callers can
/// decide whether that is a protocol violation.
///
/// # Examples
///
/// ```
/// use muxwire::byte_order::read_network_u31;
///
/// assert_eq!(read_network_u31([0x80, 0, 0, 5]), (5, true));
/// assert_eq!(read_network_u31([0, 0, 0, 5]), (5, false));
/// ```
#[must_use]
pub fn read_network_u31(bytes: [u8; 4]) -> (u32, bool) {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    let raw = u32::from_be_bytes(bytes);
    (raw & U31_MASK, raw & !U31_MASK != 0)
}

/// Serialise a 31-bit value with the reserved bit cleared.
///
/// # Examples
///
/// ```
/// use muxwire::byte_order::write_network_u31;
///
/// assert_eq!(write_network_u31(0xffff_ffff), [0x7f, 0xff, 0xff, 0xff]);
/// ```
#[must_use]
pub fn write_network_u31(value: u32) -> [u8; 4] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    let bytes = (value & U31_MASK).to_be_bytes();
    bytes
}
