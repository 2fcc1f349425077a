//! WebSocket framing over an async byte stream.
//!
//! [`WebSocketReader`] parses one physical frame per call, unmasks payloads,
//! reassembles fragmented messages and reports complete messages and control
//! frames to a [`FrameCallback`]. [`WebSocketWriter`] produces the frames it
//! reads.

pub mod protocol;
pub mod reader;
pub mod writer;

use std::io;

use bytes::Bytes;
use thiserror::Error;

pub use self::{reader::WebSocketReader, writer::WebSocketWriter};

/// Failures while reading or writing WebSocket frames.
#[derive(Debug, Error)]
pub enum WebSocketError {
    /// The peer violated the framing rules.
    #[error("{0}")]
    Protocol(String),
    /// A close frame was already read, or the writer already sent one.
    #[error("closed")]
    Closed,
    /// The source ended in the middle of a frame.
    #[error("unexpected end of stream")]
    UnexpectedEof,
    /// A text message or close reason was not valid UTF-8.
    #[error("invalid UTF-8 in text payload")]
    InvalidUtf8,
    /// Transport failure.
    #[error(transparent)]
    Io(io::Error),
}

impl WebSocketError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self { Self::Protocol(message.into()) }
}

impl From<io::Error> for WebSocketError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof
        } else {
            Self::Io(e)
        }
    }
}

/// A complete, reassembled data message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

/// Receives what a [`WebSocketReader`] decodes.
///
/// Callbacks run on the reading task, in wire order. Control frames that
/// arrive between the fragments of a message are reported before the message.
pub trait FrameCallback {
    /// A text or binary message, with all of its fragments joined.
    fn on_message(&mut self, message: Message);

    /// A ping. Answering it is the caller's business.
    fn on_ping(&mut self, payload: Bytes);

    /// A pong.
    fn on_pong(&mut self, payload: Bytes);

    /// A close frame. `code` is 1005 when the frame had no payload.
    fn on_close(&mut self, code: u16, reason: String);
}

#[cfg(test)]
mod tests;
