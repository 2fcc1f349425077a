//! The multiplexed connection controller.
//!
//! A [`Connection`] owns one duplex byte channel. A single reader task parses
//! frames from it and applies them to the shared state: the stream table,
//! settings, flow-control windows and pending pings. Application tasks open
//! streams, write data and send pings concurrently; their physical writes are
//! serialized by one writer lock while each stream makes progress on its own
//! flow-control credit.
//!
//! Shutdown is idempotent and irreversible. [`Connection::shutdown`] sends
//! GOAWAY and refuses new streams; [`Connection::close`] additionally resets
//! every open stream, cancels pending pings and releases the transport.

mod builder;
mod ping;
mod reader;
mod shared;
mod shutdown;
mod writer;

use std::{fmt, sync::Arc};

pub use builder::{CLIENT_WINDOW_SIZE, ConnectionBuilder};
use bytes::Bytes;
use log::info;
pub use ping::{PING_PAYLOAD2, Ping};
pub(crate) use shared::Shared;
use shared::OpenGauge;

use crate::{
    error::{ConnectionError, ErrorCode, Result},
    frame::{Frame, Header},
    settings::{self, Settings},
    stream::Stream,
};

/// Which end of the connection this endpoint is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends the preface and allocates odd stream ids.
    Client,
    /// Expects the preface and allocates even stream ids.
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

/// Handle to a multiplexed connection. Cloning yields another handle to the
/// same connection.
///
/// # Examples
///
/// ```no_run
/// use muxwire::{ConnectionBuilder, Role, frame::Header};
///
/// # async fn demo(io: tokio::net::TcpStream) -> muxwire::error::Result<()> {
/// let connection = ConnectionBuilder::new(Role::Client).build(io);
/// connection.open().await?;
/// let stream = connection
///     .new_stream(vec![Header::new(":method", "GET"), Header::new(":path", "/")], true)
///     .await?;
/// let response = stream.take_headers().await?;
/// let body = stream.read_to_end().await?;
/// # drop((response, body));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Start configuring a connection.
    #[must_use]
    pub fn builder(role: Role) -> ConnectionBuilder { ConnectionBuilder::new(role) }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self { Self { shared } }

    /// Write the preface (clients only) and the local settings, advertise the
    /// local receive window, then start the reader task.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidState`] if the connection was already
    /// opened, or a transport error if the handshake cannot be written.
    pub async fn open(&self) -> Result<()> {
        let reader = self
            .shared
            .take_reader()
            .ok_or(ConnectionError::InvalidState("connection already opened"))?;
        let local = self.local_settings();
        {
            let mut sink = self.shared.writer.lock().await;
            if self.shared.role == Role::Client {
                sink.preface().await?;
            }
            sink.send(Frame::Settings {
                ack: false,
                settings: local,
            })
            .await?;
            let window = local.initial_window_size();
            if window > settings::DEFAULT_INITIAL_WINDOW_SIZE {
                sink.send(Frame::WindowUpdate {
                    stream_id: 0,
                    increment: window - settings::DEFAULT_INITIAL_WINDOW_SIZE,
                })
                .await?;
            }
        }
        self.shared.lock_state().gauge = Some(OpenGauge::new());
        info!("connection opened: role={}", self.shared.role);
        let shared = Arc::clone(&self.shared);
        self.shared.executor.spawn("reader", reader::run(shared, reader));
        Ok(())
    }

    /// Open a stream by sending `headers`. With `finished` set the request
    /// carries no body and the local side closes immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Shutdown`] once the connection is shut down
    /// or its stream ids are exhausted.
    pub async fn new_stream(&self, headers: Vec<Header>, finished: bool) -> Result<Stream> {
        self.shared.create_stream(None, headers, finished).await
    }

    /// Promise a pushed stream on `associated_stream_id`. Server only.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidState`] on a client connection, or
    /// [`ConnectionError::Shutdown`] once shut down.
    pub async fn push_stream(
        &self,
        associated_stream_id: u32,
        request_headers: Vec<Header>,
    ) -> Result<Stream> {
        if self.shared.role == Role::Client {
            return Err(ConnectionError::InvalidState("client cannot push streams"));
        }
        self.shared
            .create_stream(Some(associated_stream_id), request_headers, false)
            .await
    }

    /// Send `data` on stream `stream_id`. See [`Stream::write`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::StreamClosed`] if no such stream is open.
    pub async fn write_data(&self, stream_id: u32, finished: bool, data: Bytes) -> Result<()> {
        let stream = self
            .stream(stream_id)
            .ok_or(ConnectionError::StreamClosed(stream_id))?;
        stream.write(data, finished).await
    }

    /// Send a PING. Await the returned [`Ping`] for the round-trip time.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Shutdown`] once shut down.
    pub async fn ping(&self) -> Result<Ping> { self.shared.ping().await }

    /// Merge `settings` into the local settings and send them to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Shutdown`] once shut down.
    pub async fn settings(&self, settings: Settings) -> Result<()> {
        self.shared.apply_local_settings(settings).await
    }

    /// Refuse new streams and send GOAWAY. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a transport error if GOAWAY cannot be written.
    pub async fn shutdown(&self, code: ErrorCode) -> Result<()> { self.shared.shutdown(code).await }

    /// Shut down with `connection_code`, reset remaining streams with
    /// `stream_code`, cancel pending pings and release the transport.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first write failure; the close still completes.
    pub async fn close(&self, connection_code: ErrorCode, stream_code: ErrorCode) -> Result<()> {
        self.shared.close(connection_code, stream_code).await
    }

    /// Flush buffered frames to the transport.
    ///
    /// # Errors
    ///
    /// Returns a transport error, or [`ConnectionError::Shutdown`] after close.
    pub async fn flush(&self) -> Result<()> { self.shared.writer.lock().await.flush().await }

    /// Wait until the connection has closed.
    pub async fn closed(&self) { self.shared.closed.cancelled().await; }

    /// Which end of the connection this is.
    #[must_use]
    pub fn role(&self) -> Role { self.shared.role }

    /// Returns `true` once GOAWAY was sent or received.
    #[must_use]
    pub fn is_shutdown(&self) -> bool { self.shared.lock_state().shutdown }

    /// Number of streams in the stream table.
    #[must_use]
    pub fn open_stream_count(&self) -> usize { self.shared.lock_state().streams.len() }

    /// Number of pushed streams currently routed to the push observer.
    #[must_use]
    pub fn pushed_stream_count(&self) -> usize { self.shared.push.active_count() }

    /// Look up an open stream.
    #[must_use]
    pub fn stream(&self, stream_id: u32) -> Option<Stream> {
        self.shared.lock_state().streams.get(stream_id).cloned()
    }

    /// Streams the peer allows this endpoint to open concurrently.
    #[must_use]
    pub fn max_concurrent_streams(&self) -> u32 {
        self.shared
            .lock_state()
            .peer_settings
            .max_concurrent_streams(u32::MAX)
    }

    /// Settings the peer has announced so far.
    #[must_use]
    pub fn peer_settings(&self) -> Settings { self.shared.lock_state().peer_settings }

    /// Settings this endpoint has announced.
    #[must_use]
    pub fn local_settings(&self) -> Settings { self.shared.lock_state().local_settings }
}

#[cfg(test)]
mod tests;
