//! WebSocket wire constants and helpers shared by the reader and writer.
//!
//! ```text
//!  byte 0: FIN | RSV1 | RSV2 | RSV3 | opcode (4 bits)
//!  byte 1: MASK | payload length (7 bits)
//!  then:   16-bit length if 126, 64-bit length if 127
//!  then:   4-byte mask key if MASK is set
//! ```

use super::WebSocketError;

/// Final fragment of a message.
pub const B0_FLAG_FIN: u8 = 0b1000_0000;
/// Reserved bit 1. Only meaningful under a negotiated extension.
pub const B0_FLAG_RSV1: u8 = 0b0100_0000;
/// Reserved bit 2.
pub const B0_FLAG_RSV2: u8 = 0b0010_0000;
/// Reserved bit 3.
pub const B0_FLAG_RSV3: u8 = 0b0001_0000;
/// Opcode bits of byte 0.
pub const B0_MASK_OPCODE: u8 = 0b0000_1111;
/// Opcodes with this bit set are control frames.
pub const OPCODE_FLAG_CONTROL: u8 = 0b0000_1000;

/// Payload is masked and a mask key follows the length.
pub const B1_FLAG_MASK: u8 = 0b1000_0000;
/// Length bits of byte 1.
pub const B1_MASK_LENGTH: u8 = 0b0111_1111;

pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CONTROL_CLOSE: u8 = 0x8;
pub const OPCODE_CONTROL_PING: u8 = 0x9;
pub const OPCODE_CONTROL_PONG: u8 = 0xa;

/// Largest length encoded directly in byte 1. Also the control frame limit.
pub const PAYLOAD_BYTE_MAX: u64 = 125;
/// Byte 1 length marking a 16-bit extended length.
pub const PAYLOAD_SHORT: u8 = 126;
/// Largest length encoded as a 16-bit extended length.
pub const PAYLOAD_SHORT_MAX: u64 = 0xffff;
/// Byte 1 length marking a 64-bit extended length.
pub const PAYLOAD_LONG: u8 = 127;

/// Close code reported for a close frame that carries no payload.
pub const CLOSE_NO_STATUS_CODE: u16 = 1005;
/// Close code a client sends when it goes away.
pub const CLOSE_CLIENT_GOING_AWAY: u16 = 1001;

/// XOR `buf` with `key`, treating `buf[0]` as byte `offset` of the frame's
/// payload. Applying it twice with the same key and offset is the identity.
///
/// # Examples
///
/// ```
/// use muxwire::ws::protocol::toggle_mask;
///
/// let key = [1, 2, 3, 4];
/// let mut buf = *b"hello";
/// toggle_mask(&mut buf[2..], key, 2);
/// toggle_mask(&mut buf[..2], key, 0);
/// assert_ne!(&buf, b"hello");
/// toggle_mask(&mut buf, key, 0);
/// assert_eq!(&buf, b"hello");
/// ```
pub fn toggle_mask(buf: &mut [u8], key: [u8; 4], offset: u64) {
    #[expect(clippy::cast_possible_truncation, reason = "value is below four")]
    let start = (offset % 4) as usize;
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[(start + i) % 4];
    }
}

/// Why `code` may not appear in a close frame, or `None` if it may.
#[must_use]
pub fn close_code_error(code: u16) -> Option<String> {
    if !(1000..5000).contains(&code) {
        Some(format!("Code must be in range [1000,5000): {code}"))
    } else if (1004..=1006).contains(&code) || (1012..=2999).contains(&code) {
        Some(format!("Code {code} is reserved and may not be used."))
    } else {
        None
    }
}

/// Reject close codes that are out of range or reserved.
///
/// # Errors
///
/// Returns [`WebSocketError::Protocol`] describing the violation.
pub fn validate_close_code(code: u16) -> Result<(), WebSocketError> {
    match close_code_error(code) {
        Some(message) => Err(WebSocketError::Protocol(message)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::normal(1000, None)]
    #[case::going_away(1001, None)]
    #[case::application(4999, None)]
    #[case::below_range(999, Some("Code must be in range [1000,5000): 999"))]
    #[case::above_range(5000, Some("Code must be in range [1000,5000): 5000"))]
    #[case::reserved_low(1004, Some("Code 1004 is reserved and may not be used."))]
    #[case::no_status(1005, Some("Code 1005 is reserved and may not be used."))]
    #[case::reserved_high(2999, Some("Code 2999 is reserved and may not be used."))]
    #[case::after_reserved(3000, None)]
    fn close_codes(#[case] code: u16, #[case] expected: Option<&str>) {
        assert_eq!(close_code_error(code).as_deref(), expected);
        assert_eq!(validate_close_code(code).is_ok(), expected.is_none());
    }

    #[test]
    fn mask_cycles_through_the_key_from_the_offset() {
        let mut buf = [0u8; 6];
        toggle_mask(&mut buf, [1, 2, 3, 4], 3);
        assert_eq!(buf, [4, 1, 2, 3, 4, 1]);
    }

    proptest! {
        #[test]
        fn masking_twice_restores_the_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..256),
            key in any::<[u8; 4]>(),
            offset in any::<u64>(),
        ) {
            let mut buf = payload.clone();
            toggle_mask(&mut buf, key, offset);
            toggle_mask(&mut buf, key, offset);
            prop_assert_eq!(buf, payload);
        }
    }
}
