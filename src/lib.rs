#![doc(html_root_url = "https://docs.rs/muxwire/latest")]
//! Public API for the `muxwire` library.
//!
//! This crate implements a multiplexed binary-framing connection in the
//! HTTP/2 mould: a frame codec, per-stream and per-connection flow control,
//! a stream table, a connection controller with ping and GOAWAY handling and
//! a dispatcher for server-pushed streams. It also provides a WebSocket frame
//! reader and writer.
//!
//! The crate opens no sockets. Hand [`ConnectionBuilder::build`] any duplex
//! byte channel.

pub mod byte_order;
pub mod connection;
pub mod error;
pub mod executor;
pub mod flow_control;
pub mod frame;
pub mod listener;
pub mod metrics;
pub mod push;
pub mod settings;
pub mod stream;
pub mod ws;

pub use connection::{CLIENT_WINDOW_SIZE, Connection, ConnectionBuilder, PING_PAYLOAD2, Ping, Role};
pub use error::{BoxError, ConnectionError, ErrorCode, Result};
pub use frame::{Frame, FrameDecoder, FrameEncoder, FrameError, Header};
pub use listener::{RefuseStreams, StreamListener};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_PROCESSED, PINGS_ANSWERED};
pub use push::{CancelPushes, PushObserver};
pub use settings::Settings;
pub use stream::{Lifecycle, Stream};
