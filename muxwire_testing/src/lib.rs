//! Utilities for driving a [`Connection`](muxwire::Connection) and the
//! WebSocket reader with in-memory transports during tests.
//!
//! [`ScriptedPeer`] plays the far end of a connection frame by frame:
//!
//! ```rust
//! use muxwire::{ConnectionBuilder, Role, Settings};
//! use muxwire_testing::ScriptedPeer;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> std::io::Result<()> {
//! let (connection, mut peer) = ScriptedPeer::pair(ConnectionBuilder::new(Role::Client));
//! connection.open().await.map_err(std::io::Error::other)?;
//! let announced = peer.handshake(Settings::new()).await?;
//! assert_eq!(announced, connection.local_settings());
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod macros;
pub mod peer;
pub mod ws;

pub use logging::{LoggerHandle, logger};
pub use peer::{DEFAULT_TIMEOUT, DUPLEX_CAPACITY, ScriptedPeer};
pub use ws::{Recorder, WsEvent};
