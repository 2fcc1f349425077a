//! Frame model for the multiplexed connection.
//!
//! Every frame starts with a fixed nine-byte header: a 24-bit payload length,
//! an 8-bit type, 8 bits of flags and a 31-bit stream identifier whose high bit
//! is reserved. [`FrameHeader`] models that header; [`Frame`] is the decoded,
//! type-specific view produced by [`FrameDecoder`] and consumed by
//! [`FrameEncoder`].

mod codec;
pub mod error;
pub mod hpack;
mod huffman;

use bytes::{BufMut, Bytes, BytesMut};
pub use codec::{FrameDecoder, FrameEncoder, Preface};
pub use error::FrameError;
pub use hpack::Header;

use crate::{
    byte_order::{read_network_u24, read_network_u31, write_network_u24, write_network_u31},
    error::ErrorCode,
    settings::Settings,
};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 9;

/// Bytes a client writes before its first frame.
pub const CONNECTION_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Frame flag bits. Several share a value and differ only by frame type.
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
    pub const COMPRESSED: u8 = 0x20;
}

/// Frame type identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    /// A type this crate does not interpret. Such frames are skipped.
    Unknown(u8),
}

impl From<u8> for FrameType {
    fn from(value: u8) -> Self {
        match value {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(kind: FrameType) -> Self {
        match kind {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(other) => other,
        }
    }
}

/// The fixed header preceding every frame payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length, at most 2^24 - 1.
    pub length: u32,
    /// Frame type.
    pub kind: FrameType,
    /// Type-specific flag bits.
    pub flags: u8,
    /// Stream identifier with the reserved bit cleared.
    pub stream_id: u32,
}

impl FrameHeader {
    /// Parse a header from exactly [`HEADER_LEN`] bytes.
    ///
    /// The reserved bit of the stream identifier is ignored on receipt.
    ///
    /// # Examples
    ///
    /// ```
    /// use muxwire::frame::{FrameHeader, FrameType};
    ///
    /// let header = FrameHeader::parse([0, 0, 8, 6, 1, 0, 0, 0, 0]);
    /// assert_eq!(header.length, 8);
    /// assert_eq!(header.kind, FrameType::Ping);
    /// assert_eq!(header.flags, 1);
    /// ```
    #[must_use]
    pub fn parse(bytes: [u8; HEADER_LEN]) -> Self {
        let [l0, l1, l2, kind, flags, s0, s1, s2, s3] = bytes;
        let (stream_id, _reserved) = read_network_u31([s0, s1, s2, s3]);
        Self {
            length: read_network_u24([l0, l1, l2]),
            kind: FrameType::from(kind),
            flags,
            stream_id,
        }
    }

    /// Append the encoded header to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_slice(&write_network_u24(self.length));
        dst.put_u8(self.kind.into());
        dst.put_u8(self.flags);
        dst.put_slice(&write_network_u31(self.stream_id));
    }
}

/// A decoded frame.
///
/// Header blocks are already decompressed and any CONTINUATION frames folded
/// into the HEADERS or PUSH_PROMISE frame they continue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        end_stream: bool,
        payload: Bytes,
    },
    Headers {
        stream_id: u32,
        end_stream: bool,
        headers: Vec<Header>,
    },
    Priority {
        stream_id: u32,
        dependency: u32,
        weight: u8,
        exclusive: bool,
    },
    RstStream {
        stream_id: u32,
        code: ErrorCode,
    },
    Settings {
        ack: bool,
        settings: Settings,
    },
    PushPromise {
        stream_id: u32,
        promised_id: u32,
        headers: Vec<Header>,
    },
    Ping {
        ack: bool,
        payload1: u32,
        payload2: u32,
    },
    GoAway {
        last_stream_id: u32,
        code: ErrorCode,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
}

impl Frame {
    /// Type of this frame on the wire.
    #[must_use]
    pub fn kind(&self) -> FrameType {
        match self {
            Self::Data { .. } => FrameType::Data,
            Self::Headers { .. } => FrameType::Headers,
            Self::Priority { .. } => FrameType::Priority,
            Self::RstStream { .. } => FrameType::RstStream,
            Self::Settings { .. } => FrameType::Settings,
            Self::PushPromise { .. } => FrameType::PushPromise,
            Self::Ping { .. } => FrameType::Ping,
            Self::GoAway { .. } => FrameType::GoAway,
            Self::WindowUpdate { .. } => FrameType::WindowUpdate,
        }
    }

    /// Stream the frame applies to; `0` for connection-level frames.
    #[must_use]
    pub fn stream_id(&self) -> u32 {
        match self {
            Self::Data { stream_id, .. }
            | Self::Headers { stream_id, .. }
            | Self::Priority { stream_id, .. }
            | Self::RstStream { stream_id, .. }
            | Self::PushPromise { stream_id, .. }
            | Self::WindowUpdate { stream_id, .. } => *stream_id,
            Self::Settings { .. } | Self::Ping { .. } | Self::GoAway { .. } => 0,
        }
    }
}

#[cfg(test)]
mod tests;
