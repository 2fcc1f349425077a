//! The connection's reader task.
//!
//! Exactly one task reads from the transport. It decodes frames and applies
//! each one to the shared state. Anything that could block (application
//! callbacks, acknowledgements, resets) is handed to the executor so frame
//! parsing never waits on the application.

use std::{pin::Pin, sync::Arc};

use bytes::Bytes;
use futures::StreamExt;
use log::info;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, trace, warn};

use super::{Connection, Role, Shared};
use crate::{
    error::ErrorCode,
    frame::{Frame, FrameDecoder, FrameError, FrameType, Header},
    metrics::{self, Direction},
    push::is_pushed_stream,
    settings::Settings,
    stream::{Delivery, Stream},
};

pub(crate) type BoxedRead = Pin<Box<dyn AsyncRead + Send>>;
pub(crate) type FrameReader = FramedRead<BoxedRead, FrameDecoder>;

/// Read frames until the transport ends or fails, then close the connection.
pub(super) async fn run(shared: Arc<Shared>, mut frames: FrameReader) {
    let (connection_code, stream_code) = match read_frames(&shared, &mut frames).await {
        Ok(()) => (ErrorCode::NoError, ErrorCode::Cancel),
        Err(e) if e.is_io() => {
            warn!(role = %shared.role, error = %e, "transport failed; closing connection");
            (ErrorCode::InternalError, ErrorCode::InternalError)
        }
        Err(e) => {
            metrics::inc_errors();
            error!(role = %shared.role, error = %e, "protocol error; closing connection");
            let code = e.error_code();
            (code, code)
        }
    };
    if let Err(e) = shared.close(connection_code, stream_code).await {
        debug!(error = %e, "close after reader exit failed");
    }
}

async fn read_frames(shared: &Arc<Shared>, frames: &mut FrameReader) -> Result<(), FrameError> {
    let mut awaiting_settings = shared.role == Role::Client;
    loop {
        let next = tokio::select! {
            biased;
            () = shared.closed.cancelled() => return Ok(()),
            next = frames.next() => next,
        };
        let Some(frame) = next.transpose()? else {
            return Ok(());
        };
        metrics::inc_frames(Direction::Inbound);
        trace!(kind = ?frame.kind(), stream_id = frame.stream_id(), "frame received");
        if std::mem::take(&mut awaiting_settings) && !matches!(frame, Frame::Settings { ack: false, .. }) {
            return Err(FrameError::ExpectedSettings(frame.kind()));
        }
        shared.dispatch(frame)?;
    }
}

impl Shared {
    pub(super) fn dispatch(self: &Arc<Self>, frame: Frame) -> Result<(), FrameError> {
        match frame {
            Frame::Data {
                stream_id,
                end_stream,
                payload,
            } => self.on_data(stream_id, end_stream, payload)?,
            Frame::Headers {
                stream_id,
                end_stream,
                headers,
            } => self.on_headers(stream_id, end_stream, headers),
            Frame::Priority { .. } => {}
            Frame::RstStream { stream_id, code } => self.on_rst_stream(stream_id, code),
            Frame::Settings { ack: true, .. } => trace!("peer acknowledged settings"),
            Frame::Settings { ack: false, settings } => self.on_settings(false, settings),
            Frame::PushPromise {
                stream_id,
                promised_id,
                headers,
            } => self.on_push_promise(stream_id, promised_id, headers)?,
            Frame::Ping {
                ack: true,
                payload1,
                payload2,
            } => self.receive_ping_ack(payload1, payload2),
            Frame::Ping {
                ack: false,
                payload1,
                payload2,
            } => self.defer("ping echo", move |shared| async move {
                shared
                    .writer
                    .send(Frame::Ping {
                        ack: true,
                        payload1,
                        payload2,
                    })
                    .await
            }),
            Frame::GoAway {
                last_stream_id,
                code,
                debug_data,
            } => self.on_goaway(last_stream_id, code, &debug_data),
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.on_window_update(stream_id, increment),
        }
        Ok(())
    }

    fn on_data(self: &Arc<Self>, stream_id: u32, end_stream: bool, payload: Bytes) -> Result<(), FrameError> {
        let len = payload.len();
        let stream = {
            let mut state = self.lock_state();
            if !state.read_window.receive(len) {
                return Err(FrameError::FlowControl(0));
            }
            state.streams.get(stream_id).cloned()
        };
        if is_pushed_stream(self.role, stream_id) {
            self.acknowledge(stream_id, len, None);
            self.push.data(self.weak(), stream_id, payload, end_stream);
            return Ok(());
        }
        let Some(stream) = stream else {
            debug!(stream_id, "DATA for unknown stream");
            self.acknowledge(stream_id, len, None);
            self.defer("reset", move |shared| async move {
                shared.send_reset(stream_id, ErrorCode::ProtocolError).await
            });
            return Ok(());
        };
        match stream.receive_data(payload, end_stream) {
            Delivery::Accepted { closed: true } => {
                self.remove_stream(stream_id);
            }
            Delivery::Accepted { closed: false } => {}
            Delivery::FlowControlViolated => {
                warn!(stream_id, "peer overran the stream receive window");
                self.acknowledge(stream_id, len, None);
                self.reset_later(stream_id, ErrorCode::FlowControlError);
            }
            Delivery::Discarded => self.acknowledge(stream_id, len, None),
        }
        Ok(())
    }

    fn on_headers(self: &Arc<Self>, stream_id: u32, end_stream: bool, headers: Vec<Header>) {
        if is_pushed_stream(self.role, stream_id) {
            self.push.headers(self.weak(), stream_id, headers, end_stream);
            return;
        }
        let mut state = self.lock_state();
        if let Some(stream) = state.streams.get(stream_id).cloned() {
            drop(state);
            if stream.receive_headers(headers, end_stream) {
                self.remove_stream(stream_id);
            }
            return;
        }
        if state.shutdown || !state.streams.accepts_peer_id(stream_id) {
            trace!(stream_id, "ignoring HEADERS for a closed or invalid stream");
            return;
        }
        let stream = Stream::new(
            stream_id,
            false,
            self.weak(),
            state.peer_settings.initial_window_size(),
            state.local_settings.initial_window_size(),
        );
        stream.receive_headers(headers, end_stream);
        state.streams.accept(stream.clone());
        drop(state);
        debug!(stream_id, "accepted peer-initiated stream");

        let listener = Arc::clone(&self.listener);
        self.executor.spawn("on_stream", async move {
            if let Err(e) = listener.on_stream(stream.clone()).await {
                metrics::inc_errors();
                warn!(stream_id, error = %e, "stream listener failed; resetting stream");
                if let Err(e) = stream.close(ErrorCode::ProtocolError).await {
                    debug!(stream_id, error = %e, "failed to reset stream");
                }
            }
        });
    }

    fn on_rst_stream(&self, stream_id: u32, code: ErrorCode) {
        if is_pushed_stream(self.role, stream_id) {
            self.push.reset(stream_id, code);
            return;
        }
        if let Some(stream) = self.remove_stream(stream_id) {
            debug!(stream_id, %code, "stream reset by peer");
            stream.mark_reset(code);
        }
    }

    /// Merge peer settings and adjust send windows.
    ///
    /// The first SETTINGS from the peer moves only the connection window by
    /// the change in `INITIAL_WINDOW_SIZE`. Later ones move every open
    /// stream's window instead.
    pub(crate) fn on_settings(self: &Arc<Self>, clear_previous: bool, settings: Settings) {
        let (delta, streams, merged) = {
            let mut state = self.lock_state();
            let prior = i64::from(state.peer_settings.initial_window_size());
            if clear_previous {
                state.peer_settings.clear();
            }
            state.peer_settings.merge(&settings);
            let delta = i64::from(state.peer_settings.initial_window_size()) - prior;
            let streams = if state.received_initial_peer_settings {
                if delta == 0 { Vec::new() } else { state.streams.snapshot() }
            } else {
                state.received_initial_peer_settings = true;
                state.write_window.credit(delta);
                Vec::new()
            };
            (delta, streams, state.peer_settings)
        };
        for stream in &streams {
            stream.credit(delta);
        }
        self.changed.notify_waiters();

        self.defer("settings ack", move |shared| async move {
            shared.writer.acknowledge_settings(&merged).await
        });
        let this = self.weak();
        self.executor.spawn("on_settings", async move {
            if let Some(shared) = this.upgrade() {
                let connection = Connection::from_shared(Arc::clone(&shared));
                shared.listener.on_settings(&connection).await;
            }
        });
    }

    fn on_push_promise(
        self: &Arc<Self>,
        stream_id: u32,
        promised_id: u32,
        headers: Vec<Header>,
    ) -> Result<(), FrameError> {
        if self.role == Role::Server || !is_pushed_stream(self.role, promised_id) {
            return Err(FrameError::InvalidStreamId {
                kind: FrameType::PushPromise,
                stream_id: promised_id,
            });
        }
        if !self.push.request(self.weak(), promised_id, headers) {
            warn!(stream_id, promised_id, "duplicate PUSH_PROMISE");
            self.defer("reset", move |shared| async move {
                shared.send_reset(promised_id, ErrorCode::ProtocolError).await
            });
        }
        Ok(())
    }

    fn on_goaway(&self, last_stream_id: u32, code: ErrorCode, debug_data: &[u8]) {
        if code != ErrorCode::NoError {
            debug!(%code, debug_data = %String::from_utf8_lossy(debug_data), "peer sent GOAWAY");
        }
        let refused = {
            let mut state = self.lock_state();
            state.shutdown = true;
            state.streams.remove_unprocessed(last_stream_id)
        };
        info!(
            "connection received GOAWAY: role={}, last_stream_id={last_stream_id}, code={code}, refused={}",
            self.role,
            refused.len()
        );
        for stream in &refused {
            stream.mark_reset(ErrorCode::RefusedStream);
        }
        self.changed.notify_waiters();
    }

    fn on_window_update(&self, stream_id: u32, increment: u32) {
        let delta = i64::from(increment);
        if stream_id == 0 {
            self.lock_state().write_window.credit(delta);
        } else {
            let stream = self.lock_state().streams.get(stream_id).cloned();
            match stream {
                Some(stream) => stream.credit(delta),
                None => trace!(stream_id, "WINDOW_UPDATE for unknown stream"),
            }
        }
        self.changed.notify_waiters();
    }
}
