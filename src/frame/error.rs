//! Error types for the frame layer.
//!
//! [`FrameError`] distinguishes transport failures from wire-level protocol
//! violations. Every violation maps to the [`ErrorCode`] the connection sends
//! in its GOAWAY before closing.

use std::io;

use thiserror::Error;

use super::FrameType;
use crate::error::ErrorCode;

/// Failure decoding or encoding a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The underlying transport failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A frame payload exceeded the negotiated maximum.
    #[error("FRAME_SIZE_ERROR: {size} > {max}")]
    FrameSize {
        /// Declared payload size.
        size: usize,
        /// Largest payload accepted.
        max: usize,
    },

    /// A frame arrived on a stream identifier it may not use.
    #[error("PROTOCOL_ERROR: {kind:?} frame on stream {stream_id}")]
    InvalidStreamId {
        /// Type of the offending frame.
        kind: FrameType,
        /// Stream identifier it carried.
        stream_id: u32,
    },

    /// A fixed-size frame carried the wrong payload length.
    #[error("{kind:?} length {length} is invalid")]
    InvalidLength {
        /// Type of the offending frame.
        kind: FrameType,
        /// Payload length received.
        length: usize,
    },

    /// A SETTINGS parameter carried an illegal value.
    #[error("PROTOCOL_ERROR setting {id} = {value}")]
    InvalidSetting {
        /// Parameter identifier.
        id: u16,
        /// Rejected value.
        value: u32,
    },

    /// A WINDOW_UPDATE granted no credit.
    #[error("windowSizeIncrement was 0")]
    ZeroWindowIncrement,

    /// Padding length exceeded the remaining payload.
    #[error("PROTOCOL_ERROR padding {padding} > remaining length {remaining}")]
    InvalidPadding {
        /// Declared padding.
        padding: usize,
        /// Bytes left after the padding length field.
        remaining: usize,
    },

    /// A frame other than the expected CONTINUATION interrupted a header block.
    #[error("expected CONTINUATION on stream {stream_id} but got {got:?}")]
    ExpectedContinuation {
        /// Stream whose header block is incomplete.
        stream_id: u32,
        /// Type of the interrupting frame.
        got: FrameType,
    },

    /// A CONTINUATION frame arrived with no header block in progress.
    #[error("unexpected CONTINUATION on stream {0}")]
    UnexpectedContinuation(u32),

    /// DATA arrived with compression the connection never negotiated.
    #[error("PROTOCOL_ERROR: FLAG_COMPRESSED without SETTINGS_COMPRESS_DATA")]
    CompressedData,

    /// The header block could not be decoded or encoded.
    #[error("COMPRESSION_ERROR: {0}")]
    Compression(String),

    /// The connection did not start with the expected preface.
    #[error("expected a connection preface")]
    BadPreface,

    /// The peer sent more DATA than the receive window allowed.
    #[error("FLOW_CONTROL_ERROR: receive window exceeded on stream {0}")]
    FlowControl(u32),

    /// The peer's first frame was not SETTINGS.
    #[error("expected a SETTINGS frame but was {0:?}")]
    ExpectedSettings(FrameType),
}

impl FrameError {
    /// Error code reported to the peer when this error ends the connection.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Io(_) => ErrorCode::InternalError,
            Self::FrameSize { .. } => ErrorCode::FrameSizeError,
            Self::Compression(_) => ErrorCode::CompressionError,
            Self::FlowControl(_) => ErrorCode::FlowControlError,
            _ => ErrorCode::ProtocolError,
        }
    }

    /// Returns `true` when the error came from the transport rather than the
    /// peer's bytes.
    #[must_use]
    pub fn is_io(&self) -> bool { matches!(self, Self::Io(_)) }
}
