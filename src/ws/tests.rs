//! Tests for the WebSocket reader and writer.

use bytes::{BufMut, Bytes};
use rstest::rstest;

use super::{protocol::OPCODE_CONTINUATION, *};
use crate::connection::Role;

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Message(Message),
    Ping(Bytes),
    Pong(Bytes),
    Close(u16, String),
}

#[derive(Debug, Default)]
struct Recorder(Vec<Event>);

impl FrameCallback for Recorder {
    fn on_message(&mut self, message: Message) { self.0.push(Event::Message(message)); }

    fn on_ping(&mut self, payload: Bytes) { self.0.push(Event::Ping(payload)); }

    fn on_pong(&mut self, payload: Bytes) { self.0.push(Event::Pong(payload)); }

    fn on_close(&mut self, code: u16, reason: String) { self.0.push(Event::Close(code, reason)); }
}

/// Encode one frame with the given first byte, masking with `mask` if set.
fn frame(b0: u8, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = vec![b0];
    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    match payload.len() {
        len @ 0..=125 => out.push(mask_bit | u8::try_from(len).expect("short length")),
        len @ 126..=0xffff => {
            out.push(mask_bit | 126);
            out.put_u16(u16::try_from(len).expect("16-bit length"));
        }
        len => {
            out.push(mask_bit | 127);
            out.put_u64(len as u64);
        }
    }
    let mut body = payload.to_vec();
    if let Some(key) = mask {
        out.extend_from_slice(&key);
        protocol::toggle_mask(&mut body, key, 0);
    }
    out.extend_from_slice(&body);
    out
}

/// Read frames until the source is exhausted, a close frame, or an error.
async fn read_all(role: Role, wire: &[u8]) -> (Vec<Event>, Result<(), WebSocketError>) {
    let mut reader = WebSocketReader::new(role, wire, Recorder::default());
    let result = loop {
        match reader.process_next_frame().await {
            Ok(()) if reader.is_closed() => break Ok(()),
            Ok(()) => {}
            Err(WebSocketError::UnexpectedEof) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    let (_, recorder) = reader.into_inner();
    (recorder.0, result)
}

async fn protocol_error(role: Role, wire: &[u8]) -> String {
    match read_all(role, wire).await.1 {
        Err(WebSocketError::Protocol(message)) => message,
        other => panic!("expected a protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn client_reads_unmasked_text() {
    let (events, result) = read_all(Role::Client, &frame(0x81, b"Hello", None)).await;
    result.expect("read");
    assert_eq!(events, vec![Event::Message(Message::Text("Hello".into()))]);
}

#[tokio::test]
async fn server_unmasks_client_frames() {
    let wire = frame(0x82, &[0, 1, 2, 3, 4, 5, 6], Some([0x37, 0xfa, 0x21, 0x3d]));
    let (events, result) = read_all(Role::Server, &wire).await;
    result.expect("read");
    assert_eq!(
        events,
        vec![Event::Message(Message::Binary(Bytes::from_static(&[0, 1, 2, 3, 4, 5, 6])))]
    );
}

#[rstest]
#[case::masked_to_client(Role::Client, frame(0x81, b"x", Some([1, 2, 3, 4])), "Server-sent frames must not be masked.")]
#[case::unmasked_to_server(Role::Server, frame(0x81, b"x", None), "Client-sent frames must be masked.")]
#[case::fragmented_control(Role::Client, frame(0x09, b"", None), "Control frames must be final.")]
#[case::reserved_bits(Role::Client, frame(0xc1, b"", None), "Reserved flags are unsupported.")]
#[case::oversized_control(Role::Client, frame(0x89, &[0; 126], None), "Control frame must be less than 125B.")]
#[case::one_byte_close(Role::Client, frame(0x88, &[3], None), "Malformed close payload length of 1.")]
#[case::reserved_close_code(Role::Client, frame(0x88, &1005u16.to_be_bytes(), None), "Code 1005 is reserved and may not be used.")]
#[case::close_code_range(Role::Client, frame(0x88, &999u16.to_be_bytes(), None), "Code must be in range [1000,5000): 999")]
#[case::unknown_opcode(Role::Client, frame(0x83, b"", None), "Unknown opcode: 3")]
#[case::unknown_control(Role::Client, frame(0x8b, b"", None), "Unknown control opcode: b")]
#[case::negative_length(
    Role::Client,
    vec![0x82, 127, 0x80, 0, 0, 0, 0, 0, 0, 0],
    "Frame length 0x8000000000000000 > 0x7FFFFFFFFFFFFFFF"
)]
#[tokio::test]
async fn framing_violations(#[case] role: Role, #[case] wire: Vec<u8>, #[case] message: &str) {
    assert_eq!(protocol_error(role, &wire).await, message);
}

#[tokio::test]
async fn empty_close_reports_no_status_and_closes_the_reader() {
    let mut wire = frame(0x88, b"", None);
    wire.extend(frame(0x81, b"late", None));
    let mut reader = WebSocketReader::new(Role::Client, &wire[..], Recorder::default());
    reader.process_next_frame().await.expect("close");
    assert!(reader.is_closed());
    assert!(matches!(
        reader.process_next_frame().await,
        Err(WebSocketError::Closed)
    ));
    assert_eq!(reader.callback().0, vec![Event::Close(1005, String::new())]);
}

#[tokio::test]
async fn close_with_code_and_reason() {
    let mut payload = 1000u16.to_be_bytes().to_vec();
    payload.extend_from_slice(b"bye");
    let (events, result) = read_all(Role::Client, &frame(0x88, &payload, None)).await;
    result.expect("read");
    assert_eq!(events, vec![Event::Close(1000, "bye".into())]);
}

#[tokio::test]
async fn control_frames_interleave_with_fragments() {
    let mut wire = frame(0x01, b"Hel", None);
    wire.extend(frame(0x89, b"p", None));
    wire.extend(frame(0x8a, b"q", None));
    wire.extend(frame(0x80, b"lo", None));
    let (events, result) = read_all(Role::Client, &wire).await;
    result.expect("read");
    assert_eq!(
        events,
        vec![
            Event::Ping(Bytes::from_static(b"p")),
            Event::Pong(Bytes::from_static(b"q")),
            Event::Message(Message::Text("Hello".into())),
        ]
    );
}

#[tokio::test]
async fn each_fragment_unmasks_from_its_own_offset() {
    let mut wire = frame(0x02, b"abcde", Some([9, 8, 7, 6]));
    wire.extend(frame(0x80, b"fgh", Some([1, 2, 3, 4])));
    let (events, result) = read_all(Role::Server, &wire).await;
    result.expect("read");
    assert_eq!(
        events,
        vec![Event::Message(Message::Binary(Bytes::from_static(b"abcdefgh")))]
    );
}

#[tokio::test]
async fn fragments_require_continuation_opcode() {
    let mut wire = frame(0x01, b"a", None);
    wire.extend(frame(0x82, b"b", None));
    assert_eq!(
        protocol_error(Role::Client, &wire).await,
        "Expected continuation opcode. Got: 2"
    );
}

#[tokio::test]
async fn close_between_fragments_ends_the_message() {
    let mut wire = frame(0x01, b"a", None);
    wire.extend(frame(0x88, b"", None));
    wire.extend(frame(0x80, b"b", None));
    let mut reader = WebSocketReader::new(Role::Client, &wire[..], Recorder::default());
    assert!(matches!(
        reader.process_next_frame().await,
        Err(WebSocketError::Closed)
    ));
    assert_eq!(reader.callback().0, vec![Event::Close(1005, String::new())]);
}

#[rstest]
#[case::short(300)]
#[case::long(70_000)]
#[tokio::test]
async fn extended_lengths(#[case] len: usize) {
    let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let (events, result) = read_all(Role::Client, &frame(0x82, &payload, None)).await;
    result.expect("read");
    assert_eq!(events, vec![Event::Message(Message::Binary(payload.into()))]);
}

#[tokio::test]
async fn truncated_frame_is_unexpected_eof() {
    let wire = [0x81, 5, b'a'];
    let mut reader = WebSocketReader::new(Role::Client, &wire[..], Recorder::default());
    assert!(matches!(
        reader.process_next_frame().await,
        Err(WebSocketError::UnexpectedEof)
    ));
}

#[tokio::test]
async fn invalid_utf8_text_is_rejected() {
    let (_, result) = read_all(Role::Client, &frame(0x81, &[0xff, 0xfe], None)).await;
    assert!(matches!(result, Err(WebSocketError::InvalidUtf8)));
}

#[tokio::test]
async fn client_writer_output_reads_back_on_a_server() {
    let (client, server) = tokio::io::duplex(1 << 20);
    let mut writer = WebSocketWriter::new(Role::Client, client);
    let big = vec![7u8; 70_000];
    writer.write_text("hi").await.expect("text");
    writer.write_fragment(protocol::OPCODE_BINARY, b"ab", false).await.expect("first");
    writer.write_ping(b"ping").await.expect("ping");
    writer.write_fragment(OPCODE_CONTINUATION, b"cd", true).await.expect("last");
    writer.write_binary(&big).await.expect("binary");
    writer.write_close(Some(1000), "done").await.expect("close");
    assert!(matches!(writer.write_text("late").await, Err(WebSocketError::Closed)));

    let mut reader = WebSocketReader::new(Role::Server, server, Recorder::default());
    while !reader.is_closed() {
        reader.process_next_frame().await.expect("frame");
    }
    let (_, recorder) = reader.into_inner();
    assert_eq!(
        recorder.0,
        vec![
            Event::Message(Message::Text("hi".into())),
            Event::Ping(Bytes::from_static(b"ping")),
            Event::Message(Message::Binary(Bytes::from_static(b"abcd"))),
            Event::Message(Message::Binary(big.into())),
            Event::Close(1000, "done".into()),
        ]
    );
}

#[tokio::test]
async fn writer_rejects_reserved_close_codes_and_large_pings() {
    let mut writer = WebSocketWriter::new(Role::Server, Vec::new());
    assert!(matches!(
        writer.write_close(Some(1005), "").await,
        Err(WebSocketError::Protocol(_))
    ));
    assert!(matches!(
        writer.write_ping(&[0; 126]).await,
        Err(WebSocketError::Protocol(_))
    ));
    writer.write_pong(b"ok").await.expect("pong");
    assert_eq!(writer.into_inner(), vec![0x8a, 2, b'o', b'k']);
}
