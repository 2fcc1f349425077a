//! Unit tests for the connection controller's state handling.
//!
//! Frames are fed straight into the dispatcher so window and table state can
//! be checked without racing the reader task.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rstest::{fixture, rstest};
use tokio::{
    io::{DuplexStream, ReadHalf, WriteHalf},
    time::timeout,
};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::*;
use crate::{
    frame::{FrameDecoder, FrameEncoder},
    stream::table::MAX_STREAM_ID,
};

struct Peer {
    frames: FramedRead<ReadHalf<DuplexStream>, FrameDecoder>,
    sink: FramedWrite<WriteHalf<DuplexStream>, FrameEncoder>,
}

impl Peer {
    async fn next(&mut self) -> Option<Frame> {
        timeout(Duration::from_secs(1), self.frames.next())
            .await
            .expect("peer read timed out")
            .map(|frame| frame.expect("peer decodes frame"))
    }

    async fn send(&mut self, frame: Frame) { self.sink.send(frame).await.expect("peer send"); }
}

/// An unopened client connection and the raw far end of its transport.
#[fixture]
fn client() -> (Connection, Peer) {
    let (io, far) = tokio::io::duplex(1 << 20);
    let connection = ConnectionBuilder::new(Role::Client).build(io);
    let (read, write) = tokio::io::split(far);
    let peer = Peer {
        frames: FramedRead::new(read, FrameDecoder::new(false)),
        sink: FramedWrite::new(write, FrameEncoder::new()),
    };
    (connection, peer)
}

fn window(size: u32) -> Settings {
    let mut settings = Settings::new();
    settings.set(settings::INITIAL_WINDOW_SIZE, size);
    settings
}

fn stream_window(stream: &Stream) -> i64 { stream.with_state(|s| s.write_window.available()) }

fn request() -> Vec<Header> { vec![Header::new(":method", "GET"), Header::new(":path", "/")] }

#[rstest]
#[tokio::test]
async fn first_peer_settings_adjust_only_the_connection_window(
    #[from(client)] (connection, _peer): (Connection, Peer),
) {
    let stream = connection.new_stream(request(), false).await.expect("stream");
    let shared = &connection.shared;

    shared.on_settings(false, window(32_767));
    assert_eq!(shared.lock_state().write_window.available(), 32_767);
    assert_eq!(stream_window(&stream), 65_535);

    shared.on_settings(false, window(16_383));
    assert_eq!(shared.lock_state().write_window.available(), 32_767);
    assert_eq!(stream_window(&stream), 65_535 - 16_384);
}

#[rstest]
#[tokio::test]
async fn clearing_previous_settings_restores_defaults(
    #[from(client)] (connection, _peer): (Connection, Peer),
) {
    let shared = &connection.shared;
    let mut first = window(1_000);
    first.set(settings::MAX_CONCURRENT_STREAMS, 10);
    shared.on_settings(false, first);

    let mut replacement = Settings::new();
    replacement.set(settings::MAX_FRAME_SIZE, 32_768);
    shared.on_settings(true, replacement);

    let peer = connection.peer_settings();
    assert!(!peer.is_set(settings::MAX_CONCURRENT_STREAMS));
    assert_eq!(peer.initial_window_size(), settings::DEFAULT_INITIAL_WINDOW_SIZE);
    assert_eq!(peer.max_frame_size(), 32_768);
}

#[rstest]
#[tokio::test]
async fn goaway_refuses_streams_the_peer_never_saw(
    #[from(client)] (connection, _peer): (Connection, Peer),
) {
    let mut streams = Vec::new();
    for _ in 0..3 {
        streams.push(connection.new_stream(request(), false).await.expect("stream"));
    }
    connection
        .shared
        .dispatch(Frame::GoAway {
            last_stream_id: 3,
            code: ErrorCode::NoError,
            debug_data: Bytes::new(),
        })
        .expect("dispatch");

    assert!(connection.is_shutdown());
    assert_eq!(streams[0].error_code(), None);
    assert_eq!(streams[1].error_code(), Some(ErrorCode::RefusedStream));
    assert_eq!(streams[2].error_code(), Some(ErrorCode::RefusedStream));
    assert_eq!(connection.open_stream_count(), 1);
    assert!(matches!(
        connection.new_stream(request(), false).await,
        Err(ConnectionError::Shutdown)
    ));
}

#[rstest]
#[tokio::test]
async fn exhausted_stream_ids_shut_the_connection_down(
    #[from(client)] (connection, mut peer): (Connection, Peer),
) {
    connection
        .shared
        .lock_state()
        .streams
        .set_next_stream_id(MAX_STREAM_ID + 2);
    assert!(matches!(
        connection.new_stream(request(), false).await,
        Err(ConnectionError::Shutdown)
    ));
    assert!(connection.is_shutdown());
    assert!(matches!(
        peer.next().await,
        Some(Frame::GoAway {
            code: ErrorCode::RefusedStream,
            ..
        })
    ));
}

#[rstest]
#[tokio::test]
async fn headers_for_unknown_ids_follow_parity_rules(
    #[from(client)] (connection, _peer): (Connection, Peer),
) {
    let server = ConnectionBuilder::new(Role::Server).build(tokio::io::duplex(1024).0);
    let headers = |stream_id| Frame::Headers {
        stream_id,
        end_stream: false,
        headers: request(),
    };
    server.shared.dispatch(headers(5)).expect("dispatch");
    server.shared.dispatch(headers(3)).expect("dispatch");
    server.shared.dispatch(headers(4)).expect("dispatch");
    assert!(server.stream(5).is_some());
    assert!(server.stream(3).is_none());
    assert!(server.stream(4).is_none());

    connection.shared.dispatch(headers(7)).expect("dispatch");
    assert!(connection.stream(7).is_none());
}

#[rstest]
#[tokio::test]
async fn window_updates_credit_the_named_window(
    #[from(client)] (connection, _peer): (Connection, Peer),
) {
    let stream = connection.new_stream(request(), false).await.expect("stream");
    let update = |stream_id| Frame::WindowUpdate {
        stream_id,
        increment: 100,
    };
    connection.shared.dispatch(update(0)).expect("dispatch");
    connection.shared.dispatch(update(stream.id())).expect("dispatch");
    assert_eq!(connection.shared.lock_state().write_window.available(), 65_635);
    assert_eq!(stream_window(&stream), 65_635);
}

#[rstest]
#[tokio::test]
async fn close_resets_streams_and_cancels_pings_once(
    #[from(client)] (connection, mut peer): (Connection, Peer),
) {
    let stream = connection.new_stream(request(), false).await.expect("stream");
    let ping = connection.ping().await.expect("ping");

    connection
        .close(ErrorCode::ProtocolError, ErrorCode::Cancel)
        .await
        .expect("close");
    connection
        .close(ErrorCode::InternalError, ErrorCode::InternalError)
        .await
        .expect("second close is a no-op");

    assert_eq!(ping.round_trip_time().await, None);
    assert_eq!(stream.error_code(), Some(ErrorCode::Cancel));
    timeout(Duration::from_secs(1), connection.closed())
        .await
        .expect("closed resolves");

    assert!(matches!(peer.next().await, Some(Frame::Headers { stream_id: 3, .. })));
    assert!(matches!(peer.next().await, Some(Frame::Ping { ack: false, payload1: 1, .. })));
    assert!(matches!(
        peer.next().await,
        Some(Frame::GoAway {
            last_stream_id: 0,
            code: ErrorCode::ProtocolError,
            ..
        })
    ));
    assert_eq!(
        peer.next().await,
        Some(Frame::RstStream {
            stream_id: 3,
            code: ErrorCode::Cancel,
        })
    );
    assert_eq!(peer.next().await, None);
}

#[rstest]
#[tokio::test]
async fn opening_twice_is_rejected(#[from(client)] (connection, mut peer): (Connection, Peer)) {
    peer.send(Frame::Settings {
        ack: false,
        settings: Settings::new(),
    })
    .await;
    connection.open().await.expect("open");
    assert!(matches!(
        connection.open().await,
        Err(ConnectionError::InvalidState(_))
    ));
}

#[rstest]
#[tokio::test]
async fn clients_cannot_push(#[from(client)] (connection, _peer): (Connection, Peer)) {
    assert!(matches!(
        connection.push_stream(3, request()).await,
        Err(ConnectionError::InvalidState(_))
    ));
}
