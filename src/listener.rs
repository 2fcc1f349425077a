//! Application callbacks for peer-initiated streams and settings changes.

use async_trait::async_trait;

use crate::{
    connection::Connection,
    error::{BoxError, ErrorCode},
    stream::Stream,
};

/// Receives streams the peer opens and settings it announces.
///
/// Callbacks run on background tasks, never on the connection's reader, so a
/// slow listener delays only itself. Returning an error from
/// [`StreamListener::on_stream`] resets that stream with `PROTOCOL_ERROR`.
#[async_trait]
pub trait StreamListener: Send + Sync + 'static {
    /// Handle a newly accepted peer-initiated stream. Its first header block
    /// is already buffered and available through [`Stream::take_headers`].
    async fn on_stream(&self, stream: Stream) -> Result<(), BoxError>;

    /// Called after the peer's settings were merged and acknowledged.
    async fn on_settings(&self, _connection: &Connection) {}
}

/// Listener that refuses every incoming stream with `REFUSED_STREAM`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RefuseStreams;

#[async_trait]
impl StreamListener for RefuseStreams {
    async fn on_stream(&self, stream: Stream) -> Result<(), BoxError> {
        stream.close(ErrorCode::RefusedStream).await?;
        Ok(())
    }
}
