//! Tokio codecs translating between bytes and [`Frame`]s.
//!
//! [`FrameDecoder`] validates each frame against the payload rules of its type,
//! strips padding, decompresses header blocks and folds CONTINUATION frames
//! into the block they extend. Unknown frame types are skipped. [`FrameEncoder`]
//! performs the reverse and splits oversized header blocks into CONTINUATION
//! frames.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use super::{
    CONNECTION_PREFACE,
    Frame,
    FrameError,
    FrameHeader,
    FrameType,
    HEADER_LEN,
    Header,
    flags,
    hpack,
};
use crate::{
    byte_order::{U31_MASK, read_network_u31},
    error::ErrorCode,
    settings::{self, Settings},
};

/// Marker item instructing [`FrameEncoder`] to write the connection preface.
#[derive(Clone, Copy, Debug, Default)]
pub struct Preface;

/// Header block awaiting CONTINUATION frames.
#[derive(Debug)]
struct PendingBlock {
    stream_id: u32,
    kind: PendingKind,
    block: BytesMut,
}

#[derive(Debug)]
enum PendingKind {
    Headers { end_stream: bool },
    PushPromise { promised_id: u32 },
}

/// Decoder for inbound frames.
///
/// The accepted frame size is shared with the connection so that raising the
/// local `MAX_FRAME_SIZE` takes effect without touching the reader task.
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_size: Arc<AtomicU32>,
    expect_preface: bool,
    hpack: hpack::Decoder,
    max_header_block: usize,
    pending: Option<PendingBlock>,
}

impl FrameDecoder {
    /// Create a decoder. When `expect_preface` is set the stream must start with
    /// [`CONNECTION_PREFACE`], as it does when reading from a client.
    #[must_use]
    pub fn new(expect_preface: bool) -> Self {
        Self::with_max_frame_size(
            expect_preface,
            Arc::new(AtomicU32::new(settings::DEFAULT_MAX_FRAME_SIZE)),
        )
    }

    /// Create a decoder whose frame size limit is read from `max_frame_size`.
    #[must_use]
    pub fn with_max_frame_size(expect_preface: bool, max_frame_size: Arc<AtomicU32>) -> Self {
        Self {
            max_frame_size,
            expect_preface,
            hpack: hpack::Decoder::default(),
            max_header_block: settings::DEFAULT_MAX_HEADER_LIST_SIZE as usize,
            pending: None,
        }
    }

    /// Adjust the header table size the peer may use when compressing.
    pub fn set_header_table_size(&mut self, size: usize) { self.hpack.set_max_table_size(size); }

    /// Limit the encoded size of a header block, CONTINUATION frames
    /// included. Larger blocks fail with [`FrameError::Compression`].
    pub fn set_max_header_block_size(&mut self, size: usize) { self.max_header_block = size; }

    fn check_block_size(&self, size: usize) -> Result<(), FrameError> {
        if size > self.max_header_block {
            return Err(FrameError::Compression(format!(
                "header block exceeds {} bytes",
                self.max_header_block
            )));
        }
        Ok(())
    }

    fn max_frame_size(&self) -> usize { self.max_frame_size.load(Ordering::Acquire) as usize }

    fn parse(&mut self, header: FrameHeader, payload: Bytes) -> Result<Option<Frame>, FrameError> {
        if let Some(pending) = &self.pending {
            if header.kind != FrameType::Continuation || header.stream_id != pending.stream_id {
                return Err(FrameError::ExpectedContinuation {
                    stream_id: pending.stream_id,
                    got: header.kind,
                });
            }
        }
        match header.kind {
            FrameType::Data => parse_data(header, payload).map(Some),
            FrameType::Headers => self.parse_headers(header, payload),
            FrameType::Priority => parse_priority(header, payload).map(Some),
            FrameType::RstStream => parse_rst_stream(header, payload).map(Some),
            FrameType::Settings => parse_settings(header, payload).map(Some),
            FrameType::PushPromise => self.parse_push_promise(header, payload),
            FrameType::Ping => parse_ping(header, payload).map(Some),
            FrameType::GoAway => parse_goaway(header, payload).map(Some),
            FrameType::WindowUpdate => parse_window_update(header, payload).map(Some),
            FrameType::Continuation => self.parse_continuation(header, payload),
            FrameType::Unknown(kind) => {
                trace!(kind, length = header.length, "skipping unknown frame type");
                Ok(None)
            }
        }
    }

    fn parse_headers(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
    ) -> Result<Option<Frame>, FrameError> {
        require_stream(header)?;
        let mut payload = strip_padding(header, payload)?;
        if header.flags & flags::PRIORITY != 0 {
            if payload.remaining() < 5 {
                return Err(invalid_length(header));
            }
            payload.advance(5);
        }
        let kind = PendingKind::Headers {
            end_stream: header.flags & flags::END_STREAM != 0,
        };
        self.begin_block(header, kind, payload)
    }

    fn parse_push_promise(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
    ) -> Result<Option<Frame>, FrameError> {
        require_stream(header)?;
        let mut payload = strip_padding(header, payload)?;
        if payload.remaining() < 4 {
            return Err(invalid_length(header));
        }
        let promised_id = payload.get_u32() & U31_MASK;
        self.begin_block(header, PendingKind::PushPromise { promised_id }, payload)
    }

    fn parse_continuation(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
    ) -> Result<Option<Frame>, FrameError> {
        let Some(mut pending) = self.pending.take() else {
            return Err(FrameError::UnexpectedContinuation(header.stream_id));
        };
        self.check_block_size(pending.block.len() + payload.len())?;
        pending.block.extend_from_slice(&payload);
        if header.flags & flags::END_HEADERS == 0 {
            self.pending = Some(pending);
            return Ok(None);
        }
        self.finish_block(pending).map(Some)
    }

    fn begin_block(
        &mut self,
        header: FrameHeader,
        kind: PendingKind,
        fragment: Bytes,
    ) -> Result<Option<Frame>, FrameError> {
        self.check_block_size(fragment.len())?;
        let pending = PendingBlock {
            stream_id: header.stream_id,
            kind,
            block: BytesMut::from(&fragment[..]),
        };
        if header.flags & flags::END_HEADERS == 0 {
            self.pending = Some(pending);
            return Ok(None);
        }
        self.finish_block(pending).map(Some)
    }

    fn finish_block(&mut self, pending: PendingBlock) -> Result<Frame, FrameError> {
        let headers = self.hpack.decode(pending.block.freeze())?;
        Ok(match pending.kind {
            PendingKind::Headers { end_stream } => Frame::Headers {
                stream_id: pending.stream_id,
                end_stream,
                headers,
            },
            PendingKind::PushPromise { promised_id } => Frame::PushPromise {
                stream_id: pending.stream_id,
                promised_id,
                headers,
            },
        })
    }
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            if self.expect_preface {
                if src.len() < CONNECTION_PREFACE.len() {
                    return Ok(None);
                }
                if &src[..CONNECTION_PREFACE.len()] != CONNECTION_PREFACE {
                    return Err(FrameError::BadPreface);
                }
                src.advance(CONNECTION_PREFACE.len());
                self.expect_preface = false;
            }
            let Some(head) = src.get(..HEADER_LEN) else {
                return Ok(None);
            };
            let mut raw = [0u8; HEADER_LEN];
            raw.copy_from_slice(head);
            let header = FrameHeader::parse(raw);
            let length = header.length as usize;
            let max = self.max_frame_size();
            if length > max {
                return Err(FrameError::FrameSize { size: length, max });
            }
            if src.len() < HEADER_LEN + length {
                src.reserve(HEADER_LEN + length - src.len());
                return Ok(None);
            }
            src.advance(HEADER_LEN);
            let payload = src.split_to(length).freeze();
            if let Some(frame) = self.parse(header, payload)? {
                return Ok(Some(frame));
            }
        }
    }
}

fn invalid_length(header: FrameHeader) -> FrameError {
    FrameError::InvalidLength {
        kind: header.kind,
        length: header.length as usize,
    }
}

fn require_stream(header: FrameHeader) -> Result<(), FrameError> {
    if header.stream_id == 0 {
        return Err(FrameError::InvalidStreamId {
            kind: header.kind,
            stream_id: 0,
        });
    }
    Ok(())
}

fn require_connection(header: FrameHeader) -> Result<(), FrameError> {
    if header.stream_id != 0 {
        return Err(FrameError::InvalidStreamId {
            kind: header.kind,
            stream_id: header.stream_id,
        });
    }
    Ok(())
}

fn strip_padding(header: FrameHeader, mut payload: Bytes) -> Result<Bytes, FrameError> {
    if header.flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    if !payload.has_remaining() {
        return Err(invalid_length(header));
    }
    let padding = usize::from(payload.get_u8());
    let remaining = payload.len();
    if padding > remaining {
        return Err(FrameError::InvalidPadding { padding, remaining });
    }
    payload.truncate(remaining - padding);
    Ok(payload)
}

fn parse_data(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(header)?;
    if header.flags & flags::COMPRESSED != 0 {
        return Err(FrameError::CompressedData);
    }
    Ok(Frame::Data {
        stream_id: header.stream_id,
        end_stream: header.flags & flags::END_STREAM != 0,
        payload: strip_padding(header, payload)?,
    })
}

fn parse_priority(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(header)?;
    if payload.len() != 5 {
        return Err(invalid_length(header));
    }
    let mut raw = [0u8; 4];
    payload.copy_to_slice(&mut raw);
    let (dependency, exclusive) = read_network_u31(raw);
    Ok(Frame::Priority {
        stream_id: header.stream_id,
        dependency,
        weight: payload.get_u8(),
        exclusive,
    })
}

fn parse_rst_stream(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(header)?;
    if payload.len() != 4 {
        return Err(invalid_length(header));
    }
    Ok(Frame::RstStream {
        stream_id: header.stream_id,
        code: ErrorCode::from(payload.get_u32()),
    })
}

fn parse_settings(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_connection(header)?;
    let ack = header.flags & flags::ACK != 0;
    if ack {
        if !payload.is_empty() {
            return Err(invalid_length(header));
        }
        return Ok(Frame::Settings {
            ack,
            settings: Settings::new(),
        });
    }
    if payload.len() % 6 != 0 {
        return Err(invalid_length(header));
    }
    let mut parsed = Settings::new();
    while payload.has_remaining() {
        let id = payload.get_u16();
        let value = payload.get_u32();
        let valid = match id {
            settings::ENABLE_PUSH => value <= 1,
            settings::INITIAL_WINDOW_SIZE => value <= settings::MAX_INITIAL_WINDOW_SIZE,
            settings::MAX_FRAME_SIZE => {
                (settings::DEFAULT_MAX_FRAME_SIZE..=settings::MAX_MAX_FRAME_SIZE).contains(&value)
            }
            _ => true,
        };
        if !valid {
            return Err(FrameError::InvalidSetting { id, value });
        }
        parsed.set(id, value);
    }
    Ok(Frame::Settings {
        ack,
        settings: parsed,
    })
}

fn parse_ping(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_connection(header)?;
    if payload.len() != 8 {
        return Err(invalid_length(header));
    }
    Ok(Frame::Ping {
        ack: header.flags & flags::ACK != 0,
        payload1: payload.get_u32(),
        payload2: payload.get_u32(),
    })
}

fn parse_goaway(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_connection(header)?;
    if payload.len() < 8 {
        return Err(invalid_length(header));
    }
    let last_stream_id = payload.get_u32() & U31_MASK;
    let code = ErrorCode::from(payload.get_u32());
    Ok(Frame::GoAway {
        last_stream_id,
        code,
        debug_data: payload,
    })
}

fn parse_window_update(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    if payload.len() != 4 {
        return Err(invalid_length(header));
    }
    let increment = payload.get_u32() & U31_MASK;
    if increment == 0 {
        return Err(FrameError::ZeroWindowIncrement);
    }
    Ok(Frame::WindowUpdate {
        stream_id: header.stream_id,
        increment,
    })
}

/// Encoder for outbound frames.
#[derive(Debug)]
pub struct FrameEncoder {
    max_frame_size: usize,
    hpack: hpack::Encoder,
}

impl FrameEncoder {
    /// Create an encoder honouring the default peer frame size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_size: settings::DEFAULT_MAX_FRAME_SIZE as usize,
            hpack: hpack::Encoder::new(),
        }
    }

    /// Largest payload written in a single frame.
    #[must_use]
    pub fn max_frame_size(&self) -> usize { self.max_frame_size }

    /// Apply the frame size the peer advertised.
    pub fn set_max_frame_size(&mut self, size: usize) { self.max_frame_size = size; }

    fn put_header(dst: &mut BytesMut, length: usize, kind: FrameType, flags: u8, stream_id: u32) {
        #[expect(clippy::cast_possible_truncation, reason = "callers bound the length")]
        let length = length as u32;
        FrameHeader {
            length,
            kind,
            flags,
            stream_id,
        }
        .encode(dst);
    }

    fn encode_block(
        &mut self,
        kind: FrameType,
        mut flag_bits: u8,
        stream_id: u32,
        prefix: Option<u32>,
        headers: &[Header],
        dst: &mut BytesMut,
    ) {
        let mut block = BytesMut::new();
        if let Some(promised_id) = prefix {
            block.put_u32(promised_id & U31_MASK);
        }
        self.hpack.encode(headers, &mut block);
        let mut block = block.freeze();
        let first_len = block.len().min(self.max_frame_size);
        if first_len == block.len() {
            flag_bits |= flags::END_HEADERS;
        }
        Self::put_header(dst, first_len, kind, flag_bits, stream_id);
        dst.put_slice(&block.split_to(first_len));
        while !block.is_empty() {
            let len = block.len().min(self.max_frame_size);
            let end = if len == block.len() { flags::END_HEADERS } else { 0 };
            Self::put_header(dst, len, FrameType::Continuation, end, stream_id);
            dst.put_slice(&block.split_to(len));
        }
    }
}

impl Default for FrameEncoder {
    fn default() -> Self { Self::new() }
}

impl Encoder<Preface> for FrameEncoder {
    type Error = FrameError;

    fn encode(&mut self, _item: Preface, dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.put_slice(CONNECTION_PREFACE);
        Ok(())
    }
}

impl Encoder<Frame> for FrameEncoder {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        match frame {
            Frame::Data {
                stream_id,
                end_stream,
                payload,
            } => {
                if payload.len() > self.max_frame_size {
                    return Err(FrameError::FrameSize {
                        size: payload.len(),
                        max: self.max_frame_size,
                    });
                }
                let flag_bits = if end_stream { flags::END_STREAM } else { 0 };
                Self::put_header(dst, payload.len(), FrameType::Data, flag_bits, stream_id);
                dst.put_slice(&payload);
            }
            Frame::Headers {
                stream_id,
                end_stream,
                headers,
            } => {
                let flag_bits = if end_stream { flags::END_STREAM } else { 0 };
                self.encode_block(FrameType::Headers, flag_bits, stream_id, None, &headers, dst);
            }
            Frame::Priority {
                stream_id,
                dependency,
                weight,
                exclusive,
            } => {
                Self::put_header(dst, 5, FrameType::Priority, 0, stream_id);
                let exclusive_bit = if exclusive { !U31_MASK } else { 0 };
                dst.put_u32((dependency & U31_MASK) | exclusive_bit);
                dst.put_u8(weight);
            }
            Frame::RstStream { stream_id, code } => {
                Self::put_header(dst, 4, FrameType::RstStream, 0, stream_id);
                dst.put_u32(code.as_u32());
            }
            Frame::Settings { ack, settings } => {
                let flag_bits = if ack { flags::ACK } else { 0 };
                Self::put_header(dst, settings.len() * 6, FrameType::Settings, flag_bits, 0);
                for (id, value) in settings.iter() {
                    dst.put_u16(id);
                    dst.put_u32(value);
                }
            }
            Frame::PushPromise {
                stream_id,
                promised_id,
                headers,
            } => {
                self.encode_block(
                    FrameType::PushPromise,
                    0,
                    stream_id,
                    Some(promised_id),
                    &headers,
                    dst,
                );
            }
            Frame::Ping {
                ack,
                payload1,
                payload2,
            } => {
                let flag_bits = if ack { flags::ACK } else { 0 };
                Self::put_header(dst, 8, FrameType::Ping, flag_bits, 0);
                dst.put_u32(payload1);
                dst.put_u32(payload2);
            }
            Frame::GoAway {
                last_stream_id,
                code,
                debug_data,
            } => {
                Self::put_header(dst, 8 + debug_data.len(), FrameType::GoAway, 0, 0);
                dst.put_u32(last_stream_id & U31_MASK);
                dst.put_u32(code.as_u32());
                dst.put_slice(&debug_data);
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                if increment & U31_MASK == 0 {
                    return Err(FrameError::ZeroWindowIncrement);
                }
                Self::put_header(dst, 4, FrameType::WindowUpdate, 0, stream_id);
                dst.put_u32(increment & U31_MASK);
            }
        }
        Ok(())
    }
}
