//! WebSocket frame writer.

use bytes::{BufMut, BytesMut};
use rand::RngCore;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{
    WebSocketError,
    protocol::{
        B0_FLAG_FIN,
        B1_FLAG_MASK,
        OPCODE_BINARY,
        OPCODE_CONTROL_CLOSE,
        OPCODE_CONTROL_PING,
        OPCODE_CONTROL_PONG,
        OPCODE_FLAG_CONTROL,
        OPCODE_TEXT,
        PAYLOAD_BYTE_MAX,
        PAYLOAD_LONG,
        PAYLOAD_SHORT,
        PAYLOAD_SHORT_MAX,
        toggle_mask,
        validate_close_code,
    },
};
use crate::connection::Role;

/// Writes WebSocket frames to `sink`.
///
/// A client writer masks every frame with a fresh random key; a server
/// writer never masks. Each frame is flushed once written.
#[derive(Debug)]
pub struct WebSocketWriter<W> {
    role: Role,
    sink: W,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> WebSocketWriter<W> {
    /// Create a writer for the endpoint playing `role`.
    pub fn new(role: Role, sink: W) -> Self {
        Self {
            role,
            sink,
            closed: false,
        }
    }

    /// Consume the writer, returning the sink.
    pub fn into_inner(self) -> W { self.sink }

    /// Send a complete text message.
    ///
    /// # Errors
    ///
    /// Returns [`WebSocketError::Closed`] after a close frame was sent, or a
    /// transport error.
    pub async fn write_text(&mut self, text: &str) -> Result<(), WebSocketError> {
        self.write_frame(OPCODE_TEXT, text.as_bytes(), true).await
    }

    /// Send a complete binary message.
    ///
    /// # Errors
    ///
    /// As for [`WebSocketWriter::write_text`].
    pub async fn write_binary(&mut self, data: &[u8]) -> Result<(), WebSocketError> {
        self.write_frame(OPCODE_BINARY, data, true).await
    }

    /// Send one physical frame of a possibly fragmented message. Pass the
    /// message opcode for the first fragment and
    /// [`OPCODE_CONTINUATION`](super::protocol::OPCODE_CONTINUATION) after.
    ///
    /// # Errors
    ///
    /// As for [`WebSocketWriter::write_text`].
    pub async fn write_fragment(&mut self, opcode: u8, payload: &[u8], is_final: bool) -> Result<(), WebSocketError> {
        self.write_frame(opcode, payload, is_final).await
    }

    /// Send a ping.
    ///
    /// # Errors
    ///
    /// [`WebSocketError::Protocol`] if `payload` exceeds 125 bytes, otherwise
    /// as for [`WebSocketWriter::write_text`].
    pub async fn write_ping(&mut self, payload: &[u8]) -> Result<(), WebSocketError> {
        self.write_frame(OPCODE_CONTROL_PING, payload, true).await
    }

    /// Send a pong.
    ///
    /// # Errors
    ///
    /// As for [`WebSocketWriter::write_ping`].
    pub async fn write_pong(&mut self, payload: &[u8]) -> Result<(), WebSocketError> {
        self.write_frame(OPCODE_CONTROL_PONG, payload, true).await
    }

    /// Send a close frame. `None` sends an empty payload; otherwise the code
    /// is validated and followed by `reason`. No frames may follow.
    ///
    /// # Errors
    ///
    /// [`WebSocketError::Protocol`] for a reserved or out-of-range code or an
    /// oversized payload, otherwise as for [`WebSocketWriter::write_text`].
    pub async fn write_close(&mut self, code: Option<u16>, reason: &str) -> Result<(), WebSocketError> {
        let mut payload = BytesMut::new();
        if let Some(code) = code {
            validate_close_code(code)?;
            payload.put_u16(code);
            payload.put_slice(reason.as_bytes());
        }
        self.write_frame(OPCODE_CONTROL_CLOSE, &payload, true).await?;
        self.closed = true;
        Ok(())
    }

    async fn write_frame(&mut self, opcode: u8, payload: &[u8], is_final: bool) -> Result<(), WebSocketError> {
        if self.closed {
            return Err(WebSocketError::Closed);
        }
        let length = payload.len() as u64;
        if opcode & OPCODE_FLAG_CONTROL != 0 && length > PAYLOAD_BYTE_MAX {
            return Err(WebSocketError::protocol("Payload size must be less than or equal to 125"));
        }

        let mut frame = BytesMut::with_capacity(payload.len() + 14);
        frame.put_u8(if is_final { opcode | B0_FLAG_FIN } else { opcode });
        let mask_flag = if self.role == Role::Client { B1_FLAG_MASK } else { 0 };
        if length <= PAYLOAD_BYTE_MAX {
            #[expect(clippy::cast_possible_truncation, reason = "length is at most 125")]
            frame.put_u8(mask_flag | length as u8);
        } else if length <= PAYLOAD_SHORT_MAX {
            frame.put_u8(mask_flag | PAYLOAD_SHORT);
            #[expect(clippy::cast_possible_truncation, reason = "length fits in 16 bits")]
            frame.put_u16(length as u16);
        } else {
            frame.put_u8(mask_flag | PAYLOAD_LONG);
            frame.put_u64(length);
        }

        if self.role == Role::Client {
            let mut key = [0u8; 4];
            rand::thread_rng().fill_bytes(&mut key);
            frame.put_slice(&key);
            let start = frame.len();
            frame.put_slice(payload);
            toggle_mask(&mut frame[start..], key, 0);
        } else {
            frame.put_slice(payload);
        }

        self.sink.write_all(&frame).await?;
        self.sink.flush().await?;
        Ok(())
    }
}
