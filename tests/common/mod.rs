//! Shared utilities for integration tests.
//!
//! Opens connections against a [`ScriptedPeer`] and supplies listeners that
//! hand accepted streams back to the test.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use async_trait::async_trait;
use muxwire::{BoxError, Connection, ConnectionBuilder, Frame, Header, Settings, Stream, StreamListener};
use muxwire_testing::ScriptedPeer;
use tokio::sync::mpsc;

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A minimal GET request.
pub fn request() -> Vec<Header> {
    vec![
        Header::new(":method", "GET"),
        Header::new(":path", "/"),
        Header::new(":scheme", "https"),
        Header::new(":authority", "example.com"),
    ]
}

/// A minimal successful response.
pub fn response() -> Vec<Header> { vec![Header::new(":status", "200")] }

/// Open a connection built from `builder`, complete the settings exchange
/// with `peer_settings` and consume the connection's acknowledgement.
pub async fn open(builder: ConnectionBuilder, peer_settings: Settings) -> TestResult<(Connection, ScriptedPeer)> {
    let (connection, mut peer) = ScriptedPeer::pair(builder);
    connection.open().await?;
    peer.handshake(peer_settings).await?;
    peer.next_matching(|frame| matches!(frame, Frame::Settings { ack: true, .. }))
        .await?;
    Ok((connection, peer))
}

/// Listener forwarding every accepted stream to a channel.
pub struct Accept(pub mpsc::UnboundedSender<Stream>);

impl Accept {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Stream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

#[async_trait]
impl StreamListener for Accept {
    async fn on_stream(&self, stream: Stream) -> Result<(), BoxError> {
        self.0.send(stream).map_err(|_| "test dropped the stream receiver")?;
        Ok(())
    }
}
