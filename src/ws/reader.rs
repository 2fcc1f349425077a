//! Incremental WebSocket frame reader.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use super::{
    FrameCallback,
    Message,
    WebSocketError,
    protocol::{
        B0_FLAG_FIN,
        B0_FLAG_RSV1,
        B0_FLAG_RSV2,
        B0_FLAG_RSV3,
        B0_MASK_OPCODE,
        B1_FLAG_MASK,
        B1_MASK_LENGTH,
        CLOSE_NO_STATUS_CODE,
        OPCODE_BINARY,
        OPCODE_CONTINUATION,
        OPCODE_CONTROL_CLOSE,
        OPCODE_CONTROL_PING,
        OPCODE_CONTROL_PONG,
        OPCODE_FLAG_CONTROL,
        OPCODE_TEXT,
        PAYLOAD_BYTE_MAX,
        PAYLOAD_LONG,
        PAYLOAD_SHORT,
        toggle_mask,
        validate_close_code,
    },
};
use crate::connection::Role;

const CHUNK_SIZE: usize = 8192;

/// Header of the physical frame currently being read.
#[derive(Clone, Copy, Debug, Default)]
struct FrameHeader {
    opcode: u8,
    is_final: bool,
    is_control: bool,
    mask: Option<[u8; 4]>,
    length: u64,
    /// Payload bytes of this frame consumed so far; the mask offset.
    bytes_read: u64,
}

impl FrameHeader {
    fn remaining(&self) -> u64 { self.length - self.bytes_read }
}

/// Reads WebSocket frames from `source` and reports them to a callback.
///
/// The role is this endpoint's: a client reader rejects masked frames and a
/// server reader rejects unmasked ones.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use muxwire::{
///     Role,
///     ws::{FrameCallback, Message, WebSocketReader},
/// };
///
/// #[derive(Default)]
/// struct Collect(Vec<Message>);
///
/// impl FrameCallback for Collect {
///     fn on_message(&mut self, message: Message) { self.0.push(message); }
///     fn on_ping(&mut self, _: Bytes) {}
///     fn on_pong(&mut self, _: Bytes) {}
///     fn on_close(&mut self, _: u16, _: String) {}
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), muxwire::ws::WebSocketError> {
/// let wire: &[u8] = &[0x81, 0x02, b'h', b'i'];
/// let mut reader = WebSocketReader::new(Role::Client, wire, Collect::default());
/// reader.process_next_frame().await?;
/// assert_eq!(reader.callback().0, vec![Message::Text("hi".into())]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct WebSocketReader<R, C> {
    role: Role,
    source: R,
    callback: C,
    closed: bool,
    frame: FrameHeader,
    chunk: Box<[u8]>,
}

impl<R, C> WebSocketReader<R, C>
where
    R: AsyncRead + Unpin,
    C: FrameCallback,
{
    /// Create a reader for the endpoint playing `role`.
    pub fn new(role: Role, source: R, callback: C) -> Self {
        Self {
            role,
            source,
            callback,
            closed: false,
            frame: FrameHeader::default(),
            chunk: vec![0; CHUNK_SIZE].into_boxed_slice(),
        }
    }

    /// The callback receiving decoded frames.
    pub fn callback(&self) -> &C { &self.callback }

    /// Mutable access to the callback.
    pub fn callback_mut(&mut self) -> &mut C { &mut self.callback }

    /// Returns `true` once a close frame has been read.
    pub fn is_closed(&self) -> bool { self.closed }

    /// Consume the reader, returning the source and callback.
    pub fn into_inner(self) -> (R, C) { (self.source, self.callback) }

    /// Read one frame and report it.
    ///
    /// A control frame is reported immediately. A data frame is read
    /// together with all of its continuation frames, reporting any control
    /// frames interleaved between them, and the joined message is reported
    /// last.
    ///
    /// # Errors
    ///
    /// Returns [`WebSocketError::Closed`] once a close frame has been read,
    /// [`WebSocketError::Protocol`] for framing violations, and
    /// [`WebSocketError::UnexpectedEof`] if the source ends mid-frame.
    pub async fn process_next_frame(&mut self) -> Result<(), WebSocketError> {
        self.read_header().await?;
        if self.frame.is_control {
            self.read_control_frame().await
        } else {
            self.read_message_frame().await
        }
    }

    async fn read_header(&mut self) -> Result<(), WebSocketError> {
        if self.closed {
            return Err(WebSocketError::Closed);
        }
        let b0 = self.source.read_u8().await?;
        let opcode = b0 & B0_MASK_OPCODE;
        let is_final = b0 & B0_FLAG_FIN != 0;
        let is_control = b0 & OPCODE_FLAG_CONTROL != 0;
        if is_control && !is_final {
            return Err(WebSocketError::protocol("Control frames must be final."));
        }
        if b0 & (B0_FLAG_RSV1 | B0_FLAG_RSV2 | B0_FLAG_RSV3) != 0 {
            return Err(WebSocketError::protocol("Reserved flags are unsupported."));
        }

        let b1 = self.source.read_u8().await?;
        let masked = b1 & B1_FLAG_MASK != 0;
        match (self.role, masked) {
            (Role::Client, true) => {
                return Err(WebSocketError::protocol("Server-sent frames must not be masked."));
            }
            (Role::Server, false) => {
                return Err(WebSocketError::protocol("Client-sent frames must be masked."));
            }
            _ => {}
        }

        let length = match b1 & B1_MASK_LENGTH {
            PAYLOAD_SHORT => u64::from(self.source.read_u16().await?),
            PAYLOAD_LONG => {
                let length = self.source.read_u64().await?;
                if length > i64::MAX.unsigned_abs() {
                    return Err(WebSocketError::Protocol(format!(
                        "Frame length 0x{length:x} > 0x7FFFFFFFFFFFFFFF"
                    )));
                }
                length
            }
            length => u64::from(length),
        };
        if is_control && length > PAYLOAD_BYTE_MAX {
            return Err(WebSocketError::protocol("Control frame must be less than 125B."));
        }

        let mask = if masked {
            let mut key = [0u8; 4];
            self.source.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };
        self.frame = FrameHeader {
            opcode,
            is_final,
            is_control,
            mask,
            length,
            bytes_read: 0,
        };
        trace!(opcode, is_final, length, masked, "websocket frame header");
        Ok(())
    }

    /// Append the rest of the current frame's payload to `sink`, unmasking
    /// relative to this frame's own byte offset.
    async fn read_payload(&mut self, sink: &mut BytesMut) -> Result<(), WebSocketError> {
        while self.frame.remaining() > 0 {
            let want = usize::try_from(self.frame.remaining()).map_or(CHUNK_SIZE, |n| n.min(CHUNK_SIZE));
            let read = self.source.read(&mut self.chunk[..want]).await?;
            if read == 0 {
                return Err(WebSocketError::UnexpectedEof);
            }
            let chunk = &mut self.chunk[..read];
            if let Some(key) = self.frame.mask {
                toggle_mask(chunk, key, self.frame.bytes_read);
            }
            sink.extend_from_slice(chunk);
            self.frame.bytes_read += read as u64;
        }
        Ok(())
    }

    async fn read_control_frame(&mut self) -> Result<(), WebSocketError> {
        let mut payload = BytesMut::new();
        self.read_payload(&mut payload).await?;
        match self.frame.opcode {
            OPCODE_CONTROL_CLOSE => {
                let (code, reason) = match payload.len() {
                    0 => (CLOSE_NO_STATUS_CODE, String::new()),
                    1 => return Err(WebSocketError::protocol("Malformed close payload length of 1.")),
                    _ => {
                        let code = payload.get_u16();
                        validate_close_code(code)?;
                        let reason =
                            String::from_utf8(payload.to_vec()).map_err(|_| WebSocketError::InvalidUtf8)?;
                        (code, reason)
                    }
                };
                self.closed = true;
                self.callback.on_close(code, reason);
                Ok(())
            }
            OPCODE_CONTROL_PING => {
                self.callback.on_ping(payload.freeze());
                Ok(())
            }
            OPCODE_CONTROL_PONG => {
                self.callback.on_pong(payload.freeze());
                Ok(())
            }
            other => Err(WebSocketError::Protocol(format!("Unknown control opcode: {other:x}"))),
        }
    }

    async fn read_message_frame(&mut self) -> Result<(), WebSocketError> {
        let opcode = self.frame.opcode;
        if opcode != OPCODE_TEXT && opcode != OPCODE_BINARY {
            return Err(WebSocketError::Protocol(format!("Unknown opcode: {opcode:x}")));
        }
        let mut message = BytesMut::new();
        self.read_message(&mut message).await?;
        let message = if opcode == OPCODE_TEXT {
            Message::Text(String::from_utf8(message.to_vec()).map_err(|_| WebSocketError::InvalidUtf8)?)
        } else {
            Message::Binary(message.freeze())
        };
        self.callback.on_message(message);
        Ok(())
    }

    async fn read_message(&mut self, sink: &mut BytesMut) -> Result<(), WebSocketError> {
        loop {
            self.read_payload(sink).await?;
            if self.frame.is_final {
                return Ok(());
            }
            self.read_until_non_control_frame().await?;
            if self.frame.opcode != OPCODE_CONTINUATION {
                return Err(WebSocketError::Protocol(format!(
                    "Expected continuation opcode. Got: {:x}",
                    self.frame.opcode
                )));
            }
        }
    }

    /// Read headers, handling control frames, until a data frame header.
    async fn read_until_non_control_frame(&mut self) -> Result<(), WebSocketError> {
        loop {
            self.read_header().await?;
            if !self.frame.is_control {
                return Ok(());
            }
            self.read_control_frame().await?;
        }
    }
}
