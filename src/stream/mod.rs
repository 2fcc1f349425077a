//! Logical streams multiplexed over a connection.
//!
//! A [`Stream`] is a cheap, cloneable handle. The connection's
//! [`table::StreamTable`] keeps one clone for as long as the stream is active;
//! the application holds others. Inbound headers and data are buffered on the
//! stream until the application reads them, and reading is what releases
//! receive-window credit back to the peer.

pub mod table;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;

use crate::{
    connection::Shared,
    error::{ConnectionError, ErrorCode, Result},
    flow_control::{ReadWindow, Window},
    frame::Header,
};

/// Lifecycle of a stream, seen from the local endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Both directions may carry frames.
    Open,
    /// The local endpoint has finished sending.
    HalfClosedLocal,
    /// The peer has finished sending.
    HalfClosedRemote,
    /// Both directions finished, or the stream was reset.
    Closed,
}

impl Lifecycle {
    fn finish_local(self) -> Self {
        match self {
            Self::Open => Self::HalfClosedLocal,
            Self::HalfClosedRemote | Self::Closed => Self::Closed,
            Self::HalfClosedLocal => self,
        }
    }

    fn finish_remote(self) -> Self {
        match self {
            Self::Open => Self::HalfClosedRemote,
            Self::HalfClosedLocal | Self::Closed => Self::Closed,
            Self::HalfClosedRemote => self,
        }
    }

    fn local_finished(self) -> bool { matches!(self, Self::HalfClosedLocal | Self::Closed) }
}

#[derive(Debug)]
pub(crate) struct StreamState {
    pub(crate) write_window: Window,
    read_window: ReadWindow,
    lifecycle: Lifecycle,
    /// Set once the peer's END_STREAM was seen, independent of resets.
    remote_done: bool,
    reset: Option<ErrorCode>,
    headers: VecDeque<Vec<Header>>,
    data: VecDeque<Bytes>,
}

#[derive(Debug)]
struct StreamInner {
    id: u32,
    locally_initiated: bool,
    connection: Weak<Shared>,
    state: Mutex<StreamState>,
    readable: Notify,
}

/// Outcome of handing inbound DATA to a stream.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The bytes were buffered; `closed` reports whether the stream is done.
    Accepted { closed: bool },
    /// The peer overran the stream's receive window.
    FlowControlViolated,
    /// The stream was already reset; the bytes were dropped.
    Discarded,
}

/// Handle to one logical stream.
#[derive(Clone, Debug)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

impl Stream {
    pub(crate) fn new(
        id: u32,
        locally_initiated: bool,
        connection: Weak<Shared>,
        send_window: u32,
        receive_window: u32,
    ) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id,
                locally_initiated,
                connection,
                state: Mutex::new(StreamState {
                    write_window: Window::new(send_window),
                    read_window: ReadWindow::new(receive_window),
                    lifecycle: Lifecycle::Open,
                    remote_done: false,
                    reset: None,
                    headers: VecDeque::new(),
                    data: VecDeque::new(),
                }),
                readable: Notify::new(),
            }),
        }
    }

    /// Stream identifier.
    #[must_use]
    pub fn id(&self) -> u32 { self.inner.id }

    /// Returns `true` if this endpoint opened the stream.
    #[must_use]
    pub fn is_locally_initiated(&self) -> bool { self.inner.locally_initiated }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle { self.lock().lifecycle }

    /// Returns `true` until the stream is reset or both directions finish.
    #[must_use]
    pub fn is_open(&self) -> bool { self.lifecycle() != Lifecycle::Closed }

    /// Reason the stream was reset, if it was.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> { self.lock().reset }

    /// Wait for the next header block from the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::StreamReset`] if the stream is reset first,
    /// or [`ConnectionError::StreamClosed`] if the peer finished without
    /// sending further headers.
    pub async fn take_headers(&self) -> Result<Vec<Header>> {
        loop {
            let notified = self.inner.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(headers) = state.headers.pop_front() {
                    return Ok(headers);
                }
                if let Some(code) = state.reset {
                    return Err(ConnectionError::StreamReset { id: self.id(), code });
                }
                if state.remote_done {
                    return Err(ConnectionError::StreamClosed(self.id()));
                }
            }
            notified.await;
        }
    }

    /// Read the next chunk of body data.
    ///
    /// Returns `Ok(None)` once the peer has finished the stream and every
    /// buffered chunk has been read. Reading releases flow-control credit to
    /// the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::StreamReset`] if the stream was reset before
    /// the peer finished sending. Data buffered before the reset is still
    /// delivered first.
    pub async fn read(&self) -> Result<Option<Bytes>> {
        loop {
            let notified = self.inner.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(chunk) = state.data.pop_front() {
                    let stream_ack = state.read_window.consume(chunk.len());
                    let remote_done = state.remote_done;
                    drop(state);
                    self.acknowledge(chunk.len(), stream_ack.filter(|_| !remote_done));
                    return Ok(Some(chunk));
                }
                if state.remote_done {
                    return Ok(None);
                }
                if let Some(code) = state.reset {
                    return Err(ConnectionError::StreamReset { id: self.id(), code });
                }
            }
            notified.await;
        }
    }

    /// Read body data until the peer finishes the stream.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`Stream::read`].
    pub async fn read_to_end(&self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.read().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }

    /// Send `data` on this stream, waiting for flow-control credit as needed.
    ///
    /// When `finished` is set the last frame carries END_STREAM and the local
    /// side of the stream is closed.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::StreamClosed`] if the stream leaves the
    /// connection while waiting for credit, or any transport error.
    pub async fn write(&self, data: Bytes, finished: bool) -> Result<()> {
        self.check_writable()?;
        let shared = self.connection()?;
        shared.write_data(self, finished, data).await?;
        if finished {
            self.finish_local(&shared);
        }
        Ok(())
    }

    /// Send a header block on this stream, typically the response to a
    /// peer-initiated stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream already finished sending or the
    /// transport fails.
    pub async fn reply(&self, headers: Vec<Header>, finished: bool) -> Result<()> {
        self.check_writable()?;
        let shared = self.connection()?;
        shared.write_headers(self.id(), headers, finished).await?;
        if finished {
            self.finish_local(&shared);
        }
        Ok(())
    }

    /// Reset the stream with `code`. Resetting an already-reset stream does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the RST_STREAM frame cannot be written.
    pub async fn close(&self, code: ErrorCode) -> Result<()> {
        if !self.mark_reset(code) {
            return Ok(());
        }
        let shared = self.connection()?;
        shared.reset_stream(self.id(), code).await
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut StreamState) -> T) -> T {
        f(&mut self.lock())
    }

    fn connection(&self) -> Result<Arc<Shared>> {
        self.inner.connection.upgrade().ok_or(ConnectionError::Shutdown)
    }

    fn check_writable(&self) -> Result<()> {
        let state = self.lock();
        if let Some(code) = state.reset {
            return Err(ConnectionError::StreamReset { id: self.id(), code });
        }
        if state.lifecycle.local_finished() {
            return Err(ConnectionError::InvalidState("stream already finished sending"));
        }
        Ok(())
    }

    fn finish_local(&self, shared: &Shared) {
        let closed = {
            let mut state = self.lock();
            state.lifecycle = state.lifecycle.finish_local();
            state.lifecycle == Lifecycle::Closed
        };
        if closed {
            shared.remove_stream(self.id());
        }
    }

    pub(crate) fn mark_local_finished(&self) {
        let mut state = self.lock();
        state.lifecycle = state.lifecycle.finish_local();
    }

    fn acknowledge(&self, consumed: usize, stream_ack: Option<u32>) {
        if let Some(shared) = self.inner.connection.upgrade() {
            shared.acknowledge(self.id(), consumed, stream_ack);
        }
    }

    /// Buffer an inbound header block. Returns `true` if the stream is now
    /// closed.
    pub(crate) fn receive_headers(&self, headers: Vec<Header>, end_stream: bool) -> bool {
        let closed = {
            let mut state = self.lock();
            state.headers.push_back(headers);
            if end_stream {
                state.remote_done = true;
                state.lifecycle = state.lifecycle.finish_remote();
            }
            state.lifecycle == Lifecycle::Closed
        };
        self.inner.readable.notify_waiters();
        closed
    }

    /// Buffer inbound body data.
    pub(crate) fn receive_data(&self, payload: Bytes, end_stream: bool) -> Delivery {
        let delivery = {
            let mut state = self.lock();
            if state.reset.is_some() {
                return Delivery::Discarded;
            }
            if !state.read_window.receive(payload.len()) {
                return Delivery::FlowControlViolated;
            }
            if !payload.is_empty() {
                state.data.push_back(payload);
            }
            if end_stream {
                state.remote_done = true;
                state.lifecycle = state.lifecycle.finish_remote();
            }
            Delivery::Accepted {
                closed: state.lifecycle == Lifecycle::Closed,
            }
        };
        self.inner.readable.notify_waiters();
        delivery
    }

    /// Record a reset. Returns `false` if the stream was already reset.
    pub(crate) fn mark_reset(&self, code: ErrorCode) -> bool {
        let first = {
            let mut state = self.lock();
            if state.reset.is_some() {
                false
            } else {
                state.reset = Some(code);
                state.lifecycle = Lifecycle::Closed;
                true
            }
        };
        self.inner.readable.notify_waiters();
        first
    }

    /// Add send credit from a WINDOW_UPDATE or a settings change.
    pub(crate) fn credit(&self, delta: i64) { self.lock().write_window.credit(delta); }
}
