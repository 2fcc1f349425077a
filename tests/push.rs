//! Server push in both directions: a client routing pushed streams to its
//! observer, and a server promising streams.

mod common;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use common::{Accept, TestResult, open, request, response};
use muxwire::{ConnectionBuilder, ErrorCode, Frame, Header, PushObserver, Role, Settings};
use muxwire_testing::{recv_expect, send_expect};
use tokio::{sync::mpsc, time::timeout};

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Request(u32, Vec<Header>),
    Headers(u32, Vec<Header>, bool),
    Data(u32, Bytes, bool),
    Reset(u32, ErrorCode),
}

struct Observer {
    events: mpsc::UnboundedSender<Event>,
    cancel_requests: bool,
}

impl Observer {
    fn channel(cancel_requests: bool) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events, cancel_requests }, rx)
    }

    fn record(&self, event: Event) { let _ = self.events.send(event); }
}

#[async_trait]
impl PushObserver for Observer {
    async fn on_request(&self, stream_id: u32, request_headers: Vec<Header>) -> bool {
        self.record(Event::Request(stream_id, request_headers));
        self.cancel_requests
    }

    async fn on_headers(&self, stream_id: u32, response_headers: Vec<Header>, last: bool) -> bool {
        self.record(Event::Headers(stream_id, response_headers, last));
        false
    }

    async fn on_data(&self, stream_id: u32, data: Bytes, last: bool) -> bool {
        self.record(Event::Data(stream_id, data, last));
        false
    }

    async fn on_reset(&self, stream_id: u32, code: ErrorCode) { self.record(Event::Reset(stream_id, code)); }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> TestResult<Event> {
    Ok(timeout(Duration::from_secs(1), events.recv())
        .await?
        .ok_or("observer dropped")?)
}

#[tokio::test]
async fn pushed_stream_events_arrive_in_order() -> TestResult {
    let (observer, mut events) = Observer::channel(false);
    let builder = ConnectionBuilder::new(Role::Client).push_observer(observer);
    let (connection, mut peer) = open(builder, Settings::new()).await?;
    connection.new_stream(request(), true).await?;

    send_expect!(peer.send(Frame::PushPromise {
        stream_id: 3,
        promised_id: 2,
        headers: request(),
    }));
    send_expect!(peer.send(Frame::Headers {
        stream_id: 2,
        end_stream: false,
        headers: response(),
    }));
    for (payload, last) in [(&b"a"[..], false), (&b"b"[..], true)] {
        send_expect!(peer.send(Frame::Data {
            stream_id: 2,
            end_stream: last,
            payload: Bytes::from_static(payload),
        }));
    }

    assert_eq!(next_event(&mut events).await?, Event::Request(2, request()));
    assert_eq!(next_event(&mut events).await?, Event::Headers(2, response(), false));
    assert_eq!(next_event(&mut events).await?, Event::Data(2, Bytes::from_static(b"a"), false));
    assert_eq!(next_event(&mut events).await?, Event::Data(2, Bytes::from_static(b"b"), true));

    timeout(Duration::from_secs(1), async {
        while connection.pushed_stream_count() != 0 {
            tokio::task::yield_now().await;
        }
    })
    .await?;
    assert_eq!(connection.open_stream_count(), 1, "pushed ids never enter the stream table");
    Ok(())
}

#[tokio::test]
async fn observer_can_cancel_a_push() -> TestResult {
    let (observer, mut events) = Observer::channel(true);
    let builder = ConnectionBuilder::new(Role::Client).push_observer(observer);
    let (connection, mut peer) = open(builder, Settings::new()).await?;
    connection.new_stream(request(), true).await?;

    send_expect!(peer.send(Frame::PushPromise {
        stream_id: 3,
        promised_id: 4,
        headers: request(),
    }));
    assert_eq!(next_event(&mut events).await?, Event::Request(4, request()));
    assert_eq!(
        peer.next_matching(|frame| matches!(frame, Frame::RstStream { .. }))
            .await?,
        Frame::RstStream {
            stream_id: 4,
            code: ErrorCode::Cancel,
        }
    );
    assert_eq!(connection.pushed_stream_count(), 0);
    Ok(())
}

#[tokio::test]
async fn frames_after_a_cancel_are_dropped() -> TestResult {
    let (observer, mut events) = Observer::channel(true);
    let builder = ConnectionBuilder::new(Role::Client).push_observer(observer);
    let (connection, mut peer) = open(builder, Settings::new()).await?;
    connection.new_stream(request(), true).await?;

    send_expect!(peer.send(Frame::PushPromise {
        stream_id: 3,
        promised_id: 2,
        headers: request(),
    }));
    send_expect!(peer.send(Frame::Headers {
        stream_id: 2,
        end_stream: false,
        headers: response(),
    }));
    assert_eq!(
        peer.next_matching(|frame| matches!(frame, Frame::RstStream { .. }))
            .await?,
        Frame::RstStream {
            stream_id: 2,
            code: ErrorCode::Cancel,
        }
    );

    // Frames the peer sent before it saw the reset.
    for last in [false, true] {
        send_expect!(peer.send(Frame::Data {
            stream_id: 2,
            end_stream: last,
            payload: Bytes::from_static(b"late"),
        }));
    }
    send_expect!(peer.send(Frame::Ping {
        ack: false,
        payload1: 1,
        payload2: 2,
    }));
    peer.next_matching(|frame| matches!(frame, Frame::Ping { ack: true, .. }))
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(next_event(&mut events).await?, Event::Request(2, request()));
    assert!(events.try_recv().is_err(), "nothing is delivered after the cancel");
    assert_eq!(connection.pushed_stream_count(), 0);
    assert!(!connection.is_shutdown());
    Ok(())
}

#[tokio::test]
async fn duplicate_promises_are_reset() -> TestResult {
    let (observer, mut events) = Observer::channel(false);
    let builder = ConnectionBuilder::new(Role::Client).push_observer(observer);
    let (connection, mut peer) = open(builder, Settings::new()).await?;
    connection.new_stream(request(), true).await?;

    for _ in 0..2 {
        send_expect!(peer.send(Frame::PushPromise {
            stream_id: 3,
            promised_id: 6,
            headers: request(),
        }));
    }
    assert_eq!(
        peer.next_matching(|frame| matches!(frame, Frame::RstStream { .. }))
            .await?,
        Frame::RstStream {
            stream_id: 6,
            code: ErrorCode::ProtocolError,
        }
    );
    assert_eq!(next_event(&mut events).await?, Event::Request(6, request()));
    assert!(events.try_recv().is_err(), "the duplicate is not delivered");
    assert!(!connection.is_shutdown());
    Ok(())
}

#[tokio::test]
async fn peer_resets_reach_the_observer() -> TestResult {
    let (observer, mut events) = Observer::channel(false);
    let builder = ConnectionBuilder::new(Role::Client).push_observer(observer);
    let (connection, mut peer) = open(builder, Settings::new()).await?;
    connection.new_stream(request(), true).await?;

    send_expect!(peer.send(Frame::PushPromise {
        stream_id: 3,
        promised_id: 2,
        headers: request(),
    }));
    send_expect!(peer.send(Frame::RstStream {
        stream_id: 2,
        code: ErrorCode::Cancel,
    }));
    assert_eq!(next_event(&mut events).await?, Event::Request(2, request()));
    assert_eq!(next_event(&mut events).await?, Event::Reset(2, ErrorCode::Cancel));
    Ok(())
}

#[tokio::test]
async fn server_promises_and_fills_a_pushed_stream() -> TestResult {
    let (listener, mut accepted) = Accept::channel();
    let (connection, mut peer) =
        open(ConnectionBuilder::new(Role::Server).listener(listener), Settings::new()).await?;
    send_expect!(peer.send(Frame::Headers {
        stream_id: 1,
        end_stream: true,
        headers: request(),
    }));
    let associated = timeout(Duration::from_secs(1), accepted.recv())
        .await?
        .ok_or("listener channel closed")?;

    let pushed = connection.push_stream(associated.id(), request()).await?;
    assert_eq!(pushed.id(), 2);
    assert_eq!(
        recv_expect!(peer),
        Frame::PushPromise {
            stream_id: 1,
            promised_id: 2,
            headers: request(),
        }
    );

    pushed.reply(response(), false).await?;
    pushed.write(Bytes::from_static(b"pushed"), true).await?;
    assert!(matches!(
        recv_expect!(peer),
        Frame::Headers { stream_id: 2, end_stream: false, .. }
    ));
    assert_eq!(
        recv_expect!(peer),
        Frame::Data {
            stream_id: 2,
            end_stream: true,
            payload: Bytes::from_static(b"pushed"),
        }
    );
    Ok(())
}
