//! Unit tests for frame headers and the frame codecs.

use bytes::{BufMut, Bytes, BytesMut};
use proptest::prelude::*;
use rstest::rstest;
use tokio_util::codec::{Decoder, Encoder};

use super::*;
use crate::{error::ErrorCode, settings};

fn encode(frames: impl IntoIterator<Item = Frame>) -> BytesMut {
    let mut encoder = FrameEncoder::new();
    let mut dst = BytesMut::new();
    for frame in frames {
        encoder.encode(frame, &mut dst).expect("frame should encode");
    }
    dst
}

fn decode_all(mut src: BytesMut) -> Result<Vec<Frame>, FrameError> {
    let mut decoder = FrameDecoder::new(false);
    let mut frames = Vec::new();
    while let Some(frame) = decoder.decode(&mut src)? {
        frames.push(frame);
    }
    Ok(frames)
}

fn raw_frame(kind: u8, flag_bits: u8, stream_id: u32, payload: &[u8]) -> BytesMut {
    let mut dst = BytesMut::new();
    FrameHeader {
        length: u32::try_from(payload.len()).expect("test payload fits"),
        kind: FrameType::from(kind),
        flags: flag_bits,
        stream_id,
    }
    .encode(&mut dst);
    dst.put_slice(payload);
    dst
}

proptest! {
    #[test]
    fn header_fields_survive_encoding(
        length in 0u32..=0x00ff_ffff,
        kind in any::<u8>(),
        flag_bits in any::<u8>(),
        stream_id in 0u32..=0x7fff_ffff,
    ) {
        let header = FrameHeader { length, kind: FrameType::from(kind), flags: flag_bits, stream_id };
        let mut dst = BytesMut::new();
        header.encode(&mut dst);
        let raw: [u8; HEADER_LEN] = dst[..].try_into().expect("nine bytes");
        prop_assert_eq!(FrameHeader::parse(raw), header);
    }
}

#[test]
fn reserved_stream_bit_is_ignored() {
    let header = FrameHeader::parse([0, 0, 0, 0, 0, 0x80, 0, 0, 3]);
    assert_eq!(header.stream_id, 3);
}

#[test]
fn frames_decode_as_encoded() {
    let frames = vec![
        Frame::Headers {
            stream_id: 3,
            end_stream: false,
            headers: vec![Header::new(":method", "GET"), Header::new(":path", "/a")],
        },
        Frame::Data {
            stream_id: 3,
            end_stream: true,
            payload: Bytes::from_static(b"hello"),
        },
        Frame::Settings {
            ack: false,
            settings: [(settings::INITIAL_WINDOW_SIZE, 1024)].into_iter().collect(),
        },
        Frame::Ping {
            ack: true,
            payload1: 7,
            payload2: 0x4f4b_6f6b,
        },
        Frame::GoAway {
            last_stream_id: 5,
            code: ErrorCode::ProtocolError,
            debug_data: Bytes::from_static(b"bye"),
        },
        Frame::WindowUpdate {
            stream_id: 0,
            increment: 10,
        },
        Frame::RstStream {
            stream_id: 9,
            code: ErrorCode::Cancel,
        },
        Frame::PushPromise {
            stream_id: 3,
            promised_id: 2,
            headers: vec![Header::new(":path", "/pushed.css")],
        },
    ];
    let decoded = decode_all(encode(frames.clone())).expect("frames should decode");
    assert_eq!(decoded, frames);
}

#[test]
fn partial_frames_wait_for_more_bytes() {
    let mut bytes = encode([Frame::Ping {
        ack: false,
        payload1: 1,
        payload2: 2,
    }]);
    let tail = bytes.split_off(12);
    let mut decoder = FrameDecoder::new(false);
    assert!(decoder.decode(&mut bytes).expect("no error").is_none());
    bytes.unsplit(tail);
    assert!(decoder.decode(&mut bytes).expect("no error").is_some());
}

#[test]
fn oversized_header_block_uses_continuation() {
    let mut encoder = FrameEncoder::new();
    encoder.set_max_frame_size(16);
    let headers = vec![Header::new("x-long", "a".repeat(100))];
    let mut dst = BytesMut::new();
    encoder
        .encode(
            Frame::Headers {
                stream_id: 1,
                end_stream: true,
                headers: headers.clone(),
            },
            &mut dst,
        )
        .expect("headers should encode");
    assert_eq!(dst[3], u8::from(FrameType::Headers));
    assert_eq!(dst[4] & flags::END_HEADERS, 0);
    let decoded = decode_all(dst).expect("continuations should fold");
    assert_eq!(
        decoded,
        vec![Frame::Headers {
            stream_id: 1,
            end_stream: true,
            headers,
        }]
    );
}

#[test]
fn interrupted_header_block_is_rejected() {
    let mut src = raw_frame(0x1, 0, 1, &[0x82]);
    src.unsplit(raw_frame(0x6, 0, 0, &[0; 8]));
    assert!(matches!(
        decode_all(src),
        Err(FrameError::ExpectedContinuation { stream_id: 1, .. })
    ));
}

#[test]
fn endless_continuations_are_capped() {
    let mut decoder = FrameDecoder::new(false);
    decoder.set_max_header_block_size(32);
    let mut src = raw_frame(0x1, 0, 1, &[0x82; 16]);
    src.unsplit(raw_frame(0x9, 0, 1, &[0x82; 16]));
    assert_eq!(decoder.decode(&mut src).expect("block at the limit"), None);
    assert!(src.is_empty());

    let mut src = raw_frame(0x9, 0, 1, &[0x82]);
    assert!(matches!(decoder.decode(&mut src), Err(FrameError::Compression(_))));
}

#[test]
fn stray_continuation_is_rejected() {
    let src = raw_frame(0x9, flags::END_HEADERS, 1, &[0x82]);
    assert!(matches!(
        decode_all(src),
        Err(FrameError::UnexpectedContinuation(1))
    ));
}

#[test]
fn padding_is_stripped() {
    let src = raw_frame(0x0, flags::PADDED | flags::END_STREAM, 1, &[2, b'h', b'i', 0, 0]);
    assert_eq!(
        decode_all(src).expect("padded data"),
        vec![Frame::Data {
            stream_id: 1,
            end_stream: true,
            payload: Bytes::from_static(b"hi"),
        }]
    );
}

#[test]
fn unknown_frame_types_are_skipped() {
    let mut src = raw_frame(0xbe, 0, 0, b"ignored");
    src.unsplit(raw_frame(0x8, 0, 0, &[0, 0, 0, 1]));
    assert_eq!(
        decode_all(src).expect("unknown frame skipped"),
        vec![Frame::WindowUpdate {
            stream_id: 0,
            increment: 1,
        }]
    );
}

#[rstest]
#[case::data_on_connection(raw_frame(0x0, 0, 0, b"x"))]
#[case::headers_on_connection(raw_frame(0x1, flags::END_HEADERS, 0, &[0x82]))]
#[case::ping_on_stream(raw_frame(0x6, 0, 1, &[0; 8]))]
#[case::short_ping(raw_frame(0x6, 0, 0, &[0; 4]))]
#[case::settings_on_stream(raw_frame(0x4, 0, 1, &[]))]
#[case::settings_ack_with_payload(raw_frame(0x4, flags::ACK, 0, &[0, 4, 0, 0, 0, 1]))]
#[case::ragged_settings(raw_frame(0x4, 0, 0, &[0, 4, 0]))]
#[case::enable_push_two(raw_frame(0x4, 0, 0, &[0, 2, 0, 0, 0, 2]))]
#[case::window_too_large(raw_frame(0x4, 0, 0, &[0, 4, 0x80, 0, 0, 0]))]
#[case::frame_size_too_small(raw_frame(0x4, 0, 0, &[0, 5, 0, 0, 0x10, 0]))]
#[case::zero_increment(raw_frame(0x8, 0, 0, &[0, 0, 0, 0]))]
#[case::rst_on_connection(raw_frame(0x3, 0, 0, &[0, 0, 0, 8]))]
#[case::short_goaway(raw_frame(0x7, 0, 0, &[0; 4]))]
#[case::bad_padding(raw_frame(0x0, flags::PADDED, 1, &[9, 1]))]
#[case::compressed_data(raw_frame(0x0, flags::COMPRESSED, 1, b"x"))]
fn malformed_frames_are_protocol_errors(#[case] src: BytesMut) {
    let err = decode_all(src).expect_err("frame must be rejected");
    assert_eq!(err.error_code(), ErrorCode::ProtocolError, "{err}");
}

#[test]
fn frames_above_max_size_are_rejected() {
    let src = raw_frame(0x0, 0, 1, &vec![0; 16_385]);
    let err = decode_all(src).expect_err("oversized frame");
    assert!(matches!(err, FrameError::FrameSize { size: 16_385, max: 16_384 }));
    assert_eq!(err.error_code(), ErrorCode::FrameSizeError);
}

#[test]
fn data_larger_than_peer_frame_size_is_not_encoded() {
    let mut encoder = FrameEncoder::new();
    let mut dst = BytesMut::new();
    let frame = Frame::Data {
        stream_id: 1,
        end_stream: false,
        payload: Bytes::from(vec![0; 16_385]),
    };
    assert!(matches!(
        encoder.encode(frame, &mut dst),
        Err(FrameError::FrameSize { .. })
    ));
}

#[test]
fn server_decoder_requires_preface() {
    let mut decoder = FrameDecoder::new(true);
    let mut src = BytesMut::from(&CONNECTION_PREFACE[..]);
    src.unsplit(encode([Frame::Settings {
        ack: false,
        settings: settings::Settings::new(),
    }]));
    assert!(matches!(
        decoder.decode(&mut src),
        Ok(Some(Frame::Settings { ack: false, .. }))
    ));

    let mut bad = FrameDecoder::new(true);
    let mut garbage = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"[..]);
    assert!(matches!(bad.decode(&mut garbage), Err(FrameError::BadPreface)));
}

#[test]
fn preface_item_writes_magic_bytes() {
    let mut encoder = FrameEncoder::new();
    let mut dst = BytesMut::new();
    encoder.encode(Preface, &mut dst).expect("preface");
    assert_eq!(&dst[..], &CONNECTION_PREFACE[..]);
}
