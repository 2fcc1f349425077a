//! Builder for [`Connection`].

use std::sync::{Arc, atomic::AtomicU32};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::{codec::FramedRead, task::TaskTracker};

use super::{
    Connection,
    Role,
    Shared,
    reader::{BoxedRead, FrameReader},
    shared::SharedParts,
    writer::{BoxedWrite, Writer},
};
use crate::{
    executor::Executor,
    frame::FrameDecoder,
    listener::{RefuseStreams, StreamListener},
    push::{CancelPushes, PushDispatcher, PushObserver},
    settings::{self, Settings},
};

/// Receive window a client advertises by default: 16 MiB.
pub const CLIENT_WINDOW_SIZE: u32 = 16 * 1024 * 1024;

/// Configures and builds a [`Connection`] over a duplex byte channel.
///
/// # Examples
///
/// ```
/// use muxwire::{ConnectionBuilder, Role};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (io, _peer) = tokio::io::duplex(64 * 1024);
/// let connection = ConnectionBuilder::new(Role::Client).build(io);
/// assert_eq!(connection.role(), Role::Client);
/// # }
/// ```
pub struct ConnectionBuilder {
    role: Role,
    settings: Settings,
    listener: Arc<dyn StreamListener>,
    push_observer: Arc<dyn PushObserver>,
    tracker: Option<TaskTracker>,
}

impl ConnectionBuilder {
    /// Start a builder for the given role.
    ///
    /// Clients advertise [`CLIENT_WINDOW_SIZE`] as their initial window;
    /// servers start with empty settings. Incoming streams are refused and
    /// pushes canceled until a listener and observer are supplied.
    #[must_use]
    pub fn new(role: Role) -> Self {
        let mut settings = Settings::new();
        if role == Role::Client {
            settings.set(settings::INITIAL_WINDOW_SIZE, CLIENT_WINDOW_SIZE);
        }
        Self {
            role,
            settings,
            listener: Arc::new(RefuseStreams),
            push_observer: Arc::new(CancelPushes),
            tracker: None,
        }
    }

    /// Replace the settings sent when the connection opens.
    #[must_use]
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Handle streams the peer opens and settings it announces.
    #[must_use]
    pub fn listener(mut self, listener: impl StreamListener) -> Self {
        self.listener = Arc::new(listener);
        self
    }

    /// Observe streams the server pushes. Only consulted by clients.
    #[must_use]
    pub fn push_observer(mut self, observer: impl PushObserver) -> Self {
        self.push_observer = Arc::new(observer);
        self
    }

    /// Track background tasks with `tracker` so callers can await them.
    #[must_use]
    pub fn task_tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Build the connection. Nothing is written until [`Connection::open`].
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn build<T>(self, io: T) -> Connection
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let read_half: BoxedRead = Box::pin(read_half);
        let write_half: BoxedWrite = Box::pin(write_half);

        let local_max_frame_size = Arc::new(AtomicU32::new(self.settings.max_frame_size()));
        let mut decoder = FrameDecoder::with_max_frame_size(
            self.role == Role::Server,
            Arc::clone(&local_max_frame_size),
        );
        decoder.set_max_header_block_size(
            self.settings
                .max_header_list_size(settings::DEFAULT_MAX_HEADER_LIST_SIZE) as usize,
        );
        let reader: FrameReader = FramedRead::new(read_half, decoder);
        let executor = Executor::new(self.tracker.unwrap_or_default());

        let shared = Shared::new(SharedParts {
            role: self.role,
            local_settings: self.settings,
            writer: Writer::new(write_half),
            reader,
            listener: self.listener,
            push: PushDispatcher::new(self.push_observer, executor.clone()),
            executor,
            local_max_frame_size,
        });
        Connection::from_shared(shared)
    }
}
