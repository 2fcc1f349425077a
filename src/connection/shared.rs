//! State shared by the connection handle, its streams and its reader task.
//!
//! Two locks guard a connection. The tokio writer lock serializes physical
//! writes; the std state lock guards the stream table, settings, windows and
//! pings. The state lock is never held across an `.await`, and when both are
//! needed the writer lock is taken first.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, Weak, atomic::AtomicU32},
};

use bytes::Bytes;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Role, ping::Ping, reader::FrameReader, writer::Writer};
use crate::{
    error::{ConnectionError, ErrorCode, Result},
    executor::Executor,
    flow_control::{self, ReadWindow, Window},
    frame::{Frame, Header},
    listener::StreamListener,
    metrics,
    push::PushDispatcher,
    settings::{self, Settings},
    stream::{Stream, table::StreamTable},
};

/// Keeps the open-connections gauge raised while held.
#[derive(Debug)]
pub(crate) struct OpenGauge;

impl OpenGauge {
    pub(crate) fn new() -> Self {
        metrics::inc_connections();
        Self
    }
}

impl Drop for OpenGauge {
    fn drop(&mut self) { metrics::dec_connections(); }
}

/// Everything guarded by the state lock.
#[derive(Debug)]
pub(crate) struct ConnState {
    pub(crate) streams: StreamTable,
    pub(crate) pings: HashMap<u32, Ping>,
    pub(crate) next_ping_id: u32,
    pub(crate) local_settings: Settings,
    pub(crate) peer_settings: Settings,
    pub(crate) received_initial_peer_settings: bool,
    /// Credit for DATA sent on any stream.
    pub(crate) write_window: Window,
    /// Acknowledgement tracker for DATA received on any stream.
    pub(crate) read_window: ReadWindow,
    pub(crate) shutdown: bool,
    pub(crate) closing: bool,
    pub(crate) gauge: Option<OpenGauge>,
}

impl ConnState {
    fn new(role: Role, local_settings: Settings) -> Self {
        Self {
            streams: StreamTable::new(role),
            pings: HashMap::new(),
            next_ping_id: match role {
                Role::Client => 1,
                Role::Server => 2,
            },
            local_settings,
            peer_settings: Settings::new(),
            received_initial_peer_settings: false,
            write_window: Window::new(settings::DEFAULT_INITIAL_WINDOW_SIZE),
            read_window: ReadWindow::new(
                local_settings
                    .initial_window_size()
                    .max(settings::DEFAULT_INITIAL_WINDOW_SIZE),
            ),
            shutdown: false,
            closing: false,
            gauge: None,
        }
    }
}

pub(crate) struct Shared {
    pub(crate) role: Role,
    this: Weak<Shared>,
    state: Mutex<ConnState>,
    /// Woken whenever send credit grows or a stream leaves the table.
    pub(crate) changed: Notify,
    pub(crate) writer: Writer,
    pub(crate) listener: Arc<dyn StreamListener>,
    pub(crate) push: PushDispatcher,
    pub(crate) executor: Executor,
    pub(crate) closed: CancellationToken,
    /// Frame size limit applied by the decoder.
    pub(crate) local_max_frame_size: Arc<AtomicU32>,
    reader: Mutex<Option<FrameReader>>,
}

pub(crate) struct SharedParts {
    pub(crate) role: Role,
    pub(crate) local_settings: Settings,
    pub(crate) writer: Writer,
    pub(crate) reader: FrameReader,
    pub(crate) listener: Arc<dyn StreamListener>,
    pub(crate) push: PushDispatcher,
    pub(crate) executor: Executor,
    pub(crate) local_max_frame_size: Arc<AtomicU32>,
}

impl Shared {
    pub(crate) fn new(parts: SharedParts) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            role: parts.role,
            this: this.clone(),
            state: Mutex::new(ConnState::new(parts.role, parts.local_settings)),
            changed: Notify::new(),
            writer: parts.writer,
            listener: parts.listener,
            push: parts.push,
            executor: parts.executor,
            closed: CancellationToken::new(),
            local_max_frame_size: parts.local_max_frame_size,
            reader: Mutex::new(Some(parts.reader)),
        })
    }

    pub(crate) fn weak(&self) -> Weak<Shared> { self.this.clone() }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ConnState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn take_reader(&self) -> Option<FrameReader> {
        self.reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    /// Run a write on the control queue, after everything queued before it.
    pub(crate) fn defer<F, Fut>(&self, what: &'static str, job: F)
    where
        F: FnOnce(Arc<Shared>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let this = self.weak();
        self.executor.control().submit(async move {
            let Some(shared) = this.upgrade() else {
                return;
            };
            if let Err(e) = job(shared).await {
                debug!(task = what, error = %e, "deferred write failed");
            }
        });
    }

    /// Allocate, register and announce a locally-initiated stream.
    ///
    /// With `associated` set the stream is announced with PUSH_PROMISE on that
    /// stream instead of HEADERS.
    pub(crate) async fn create_stream(
        &self,
        associated: Option<u32>,
        headers: Vec<Header>,
        finished: bool,
    ) -> Result<Stream> {
        let mut sink = self.writer.lock().await;
        let allocated = {
            let mut state = self.lock_state();
            if state.shutdown {
                return Err(ConnectionError::Shutdown);
            }
            state.streams.allocate_id().map(|id| {
                let stream = Stream::new(
                    id,
                    true,
                    self.weak(),
                    state.peer_settings.initial_window_size(),
                    state.local_settings.initial_window_size(),
                );
                if finished {
                    stream.mark_local_finished();
                }
                state.streams.insert(stream.clone());
                stream
            })
        };
        let Some(stream) = allocated else {
            drop(sink);
            tracing::warn!("stream ids exhausted; shutting down");
            self.shutdown(ErrorCode::RefusedStream).await?;
            return Err(ConnectionError::Shutdown);
        };
        let frame = match associated {
            None => Frame::Headers {
                stream_id: stream.id(),
                end_stream: finished,
                headers,
            },
            Some(stream_id) => Frame::PushPromise {
                stream_id,
                promised_id: stream.id(),
                headers,
            },
        };
        sink.send(frame).await?;
        Ok(stream)
    }

    pub(crate) async fn write_headers(
        &self,
        stream_id: u32,
        headers: Vec<Header>,
        finished: bool,
    ) -> Result<()> {
        self.writer
            .send(Frame::Headers {
                stream_id,
                end_stream: finished,
                headers,
            })
            .await
    }

    /// Send `data` as one or more DATA frames, each bounded by the connection
    /// window, the stream window and the peer's frame size.
    pub(crate) async fn write_data(&self, stream: &Stream, finished: bool, mut data: Bytes) -> Result<()> {
        if data.is_empty() {
            return self
                .writer
                .send(Frame::Data {
                    stream_id: stream.id(),
                    end_stream: finished,
                    payload: data,
                })
                .await;
        }
        while !data.is_empty() {
            let granted = self.reserve(stream, data.len()).await?;
            let payload = data.split_to(granted);
            self.writer
                .send(Frame::Data {
                    stream_id: stream.id(),
                    end_stream: finished && data.is_empty(),
                    payload,
                })
                .await?;
        }
        Ok(())
    }

    /// Wait until both windows have credit, then take up to `requested` bytes.
    async fn reserve(&self, stream: &Stream, requested: usize) -> Result<usize> {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            {
                let mut state = self.lock_state();
                if !state.streams.contains(stream.id()) {
                    return Err(ConnectionError::StreamClosed(stream.id()));
                }
                let max_frame_size = self.writer.max_frame_size();
                let granted = stream.with_state(|s| {
                    flow_control::reserve(
                        &mut state.write_window,
                        &mut s.write_window,
                        requested,
                        max_frame_size,
                    )
                });
                if granted > 0 {
                    return Ok(granted);
                }
            }
            changed.await;
        }
    }

    /// Record bytes consumed by the application, or discarded by the
    /// connection, and queue any WINDOW_UPDATE that is due.
    pub(crate) fn acknowledge(&self, stream_id: u32, consumed: usize, stream_ack: Option<u32>) {
        let connection_ack = self.lock_state().read_window.consume(consumed);
        if stream_ack.is_none() && connection_ack.is_none() {
            return;
        }
        self.defer("window update", move |shared| async move {
            if let Some(increment) = stream_ack {
                shared
                    .writer
                    .send(Frame::WindowUpdate { stream_id, increment })
                    .await?;
            }
            if let Some(increment) = connection_ack {
                shared
                    .writer
                    .send(Frame::WindowUpdate {
                        stream_id: 0,
                        increment,
                    })
                    .await?;
            }
            Ok(())
        });
    }

    pub(crate) fn remove_stream(&self, stream_id: u32) -> Option<Stream> {
        let removed = self.lock_state().streams.remove(stream_id);
        self.changed.notify_waiters();
        removed
    }

    pub(crate) async fn send_reset(&self, stream_id: u32, code: ErrorCode) -> Result<()> {
        self.writer.send(Frame::RstStream { stream_id, code }).await
    }

    /// Remove a stream the application reset and tell the peer.
    pub(crate) async fn reset_stream(&self, stream_id: u32, code: ErrorCode) -> Result<()> {
        self.remove_stream(stream_id);
        self.send_reset(stream_id, code).await
    }

    /// Reset a stream from the reader task without waiting for the write.
    pub(crate) fn reset_later(&self, stream_id: u32, code: ErrorCode) {
        if let Some(stream) = self.remove_stream(stream_id) {
            stream.mark_reset(code);
        }
        debug!(stream_id, %code, "resetting stream");
        self.defer("reset", move |shared| async move {
            shared.send_reset(stream_id, code).await
        });
    }

    /// Merge `settings` into the local settings and send them.
    pub(crate) async fn apply_local_settings(&self, settings: Settings) -> Result<()> {
        let mut sink = self.writer.lock().await;
        {
            let mut state = self.lock_state();
            if state.shutdown {
                return Err(ConnectionError::Shutdown);
            }
            state.local_settings.merge(&settings);
            if let Some(size) = settings.get(settings::MAX_FRAME_SIZE) {
                self.local_max_frame_size
                    .store(size, std::sync::atomic::Ordering::Release);
            }
        }
        sink.send(Frame::Settings {
            ack: false,
            settings,
        })
        .await
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("role", &self.role)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}
