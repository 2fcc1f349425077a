//! Canonical error and result types for the crate.
//!
//! Three kinds of failure surface from a connection: wire-level protocol
//! violations ([`FrameError`]), state errors such as writing after shutdown or
//! into a vanished stream, and transport I/O failures. [`ConnectionError`]
//! carries all three; [`ErrorCode`] is the 32-bit code exchanged with the peer
//! in RST_STREAM and GOAWAY frames.

use std::{fmt, io};

use thiserror::Error;

use crate::frame::FrameError;

/// Error code carried by RST_STREAM and GOAWAY frames.
///
/// Codes the crate does not know are preserved in [`ErrorCode::Other`] so they
/// can be reported back verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
    /// A code outside the registered range.
    Other(u32),
}

impl ErrorCode {
    /// Wire representation of this code.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            Self::NoError => 0x0,
            Self::ProtocolError => 0x1,
            Self::InternalError => 0x2,
            Self::FlowControlError => 0x3,
            Self::SettingsTimeout => 0x4,
            Self::StreamClosed => 0x5,
            Self::FrameSizeError => 0x6,
            Self::RefusedStream => 0x7,
            Self::Cancel => 0x8,
            Self::CompressionError => 0x9,
            Self::ConnectError => 0xa,
            Self::EnhanceYourCalm => 0xb,
            Self::InadequateSecurity => 0xc,
            Self::Http11Required => 0xd,
            Self::Other(code) => code,
        }
    }
}

impl From<u32> for ErrorCode {
    fn from(value: u32) -> Self {
        match value {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            other => Self::Other(other),
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self { code.as_u32() }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoError => "NO_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::SettingsTimeout => "SETTINGS_TIMEOUT",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::FrameSizeError => "FRAME_SIZE_ERROR",
            Self::RefusedStream => "REFUSED_STREAM",
            Self::Cancel => "CANCEL",
            Self::CompressionError => "COMPRESSION_ERROR",
            Self::ConnectError => "CONNECT_ERROR",
            Self::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            Self::InadequateSecurity => "INADEQUATE_SECURITY",
            Self::Http11Required => "HTTP_1_1_REQUIRED",
            Self::Other(code) => return write!(f, "UNKNOWN({code:#x})"),
        };
        f.write_str(name)
    }
}

/// Errors reported by [`crate::Connection`] and [`crate::Stream`] operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection was shut down before or during the operation.
    #[error("connection already shut down")]
    Shutdown,
    /// The stream is no longer in the connection's stream table.
    #[error("stream {0} closed")]
    StreamClosed(u32),
    /// The stream was reset by either side.
    #[error("stream {id} was reset: {code}")]
    StreamReset {
        /// Identifier of the reset stream.
        id: u32,
        /// Reason carried by the reset.
        code: ErrorCode,
    },
    /// The operation is not valid for this connection or stream.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// The frame layer rejected outgoing or incoming bytes.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// Returns `true` when the error means the connection can no longer be used.
    #[must_use]
    pub fn is_shutdown(&self) -> bool { matches!(self, Self::Shutdown) }
}

/// Result alias used by the connection and stream APIs.
pub type Result<T, E = ConnectionError> = std::result::Result<T, E>;

/// Boxed error returned by application callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
