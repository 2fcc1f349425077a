//! WebSocket frame builders and a recording callback.

use bytes::{BufMut, Bytes};
use muxwire::ws::{FrameCallback, Message, protocol};

/// Encode one frame with first byte `b0`. With `mask` set the mask bit is
/// raised and the payload masked from offset zero.
///
/// Unlike [`WebSocketWriter`](muxwire::ws::WebSocketWriter) this accepts any
/// first byte, including reserved bits and unknown opcodes.
pub fn raw_frame(b0: u8, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.put_u8(b0);
    let mask_bit = if mask.is_some() { protocol::B1_FLAG_MASK } else { 0 };
    match u16::try_from(payload.len()) {
        Ok(len @ 0..=125) => out.put_u8(mask_bit | len as u8),
        Ok(len) => {
            out.put_u8(mask_bit | protocol::PAYLOAD_SHORT);
            out.put_u16(len);
        }
        Err(_) => {
            out.put_u8(mask_bit | protocol::PAYLOAD_LONG);
            out.put_u64(payload.len() as u64);
        }
    }
    let start = out.len() + if mask.is_some() { 4 } else { 0 };
    if let Some(key) = mask {
        out.put_slice(&key);
    }
    out.put_slice(payload);
    if let Some(key) = mask {
        protocol::toggle_mask(&mut out[start..], key, 0);
    }
    out
}

/// A final text frame.
pub fn text(text: &str, mask: Option<[u8; 4]>) -> Vec<u8> {
    raw_frame(protocol::B0_FLAG_FIN | protocol::OPCODE_TEXT, text.as_bytes(), mask)
}

/// A final binary frame.
pub fn binary(data: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    raw_frame(protocol::B0_FLAG_FIN | protocol::OPCODE_BINARY, data, mask)
}

/// A ping.
pub fn ping(payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    raw_frame(protocol::B0_FLAG_FIN | protocol::OPCODE_CONTROL_PING, payload, mask)
}

/// A close frame with `code` and `reason`, or an empty one for `None`.
pub fn close(code: Option<u16>, reason: &str, mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut payload = Vec::new();
    if let Some(code) = code {
        payload.put_u16(code);
        payload.put_slice(reason.as_bytes());
    }
    raw_frame(protocol::B0_FLAG_FIN | protocol::OPCODE_CONTROL_CLOSE, &payload, mask)
}

/// What a [`Recorder`] saw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsEvent {
    Message(Message),
    Ping(Bytes),
    Pong(Bytes),
    Close(u16, String),
}

/// Records every callback in order.
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<WsEvent>,
}

impl FrameCallback for Recorder {
    fn on_message(&mut self, message: Message) { self.events.push(WsEvent::Message(message)); }

    fn on_ping(&mut self, payload: Bytes) { self.events.push(WsEvent::Ping(payload)); }

    fn on_pong(&mut self, payload: Bytes) { self.events.push(WsEvent::Pong(payload)); }

    fn on_close(&mut self, code: u16, reason: String) { self.events.push(WsEvent::Close(code, reason)); }
}
