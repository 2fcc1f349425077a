//! Server-pushed streams.
//!
//! On a client connection, even stream ids belong to streams the server
//! pushed. Their frames bypass the stream table and go to a
//! [`PushObserver`] through the [`PushDispatcher`], which gives each pushed id
//! its own serial queue.

mod dispatcher;

use async_trait::async_trait;
use bytes::Bytes;
pub use dispatcher::PushDispatcher;

use crate::{connection::Role, error::ErrorCode, frame::Header};

/// Returns `true` if frames for `stream_id` belong to a pushed stream on a
/// connection playing `role`.
///
/// # Examples
///
/// ```
/// use muxwire::{Role, push::is_pushed_stream};
///
/// assert!(is_pushed_stream(Role::Client, 2));
/// assert!(!is_pushed_stream(Role::Client, 3));
/// assert!(!is_pushed_stream(Role::Server, 2));
/// ```
#[must_use]
pub fn is_pushed_stream(role: Role, stream_id: u32) -> bool {
    role == Role::Client && stream_id != 0 && stream_id % 2 == 0
}

/// Observes streams pushed by the server.
///
/// Calls for one pushed id are strictly ordered. Returning `true` from any of
/// the first three methods cancels the push: the connection resets the id
/// with `CANCEL` and stops routing it to the observer.
#[async_trait]
pub trait PushObserver: Send + Sync + 'static {
    /// A PUSH_PROMISE announced the request the server intends to answer.
    async fn on_request(&self, stream_id: u32, request_headers: Vec<Header>) -> bool;

    /// Response headers for a pushed stream arrived.
    async fn on_headers(&self, stream_id: u32, response_headers: Vec<Header>, last: bool) -> bool;

    /// A complete DATA payload for a pushed stream arrived.
    async fn on_data(&self, stream_id: u32, data: Bytes, last: bool) -> bool;

    /// The server reset a pushed stream.
    async fn on_reset(&self, stream_id: u32, code: ErrorCode);
}

/// Observer that cancels every push.
#[derive(Clone, Copy, Debug, Default)]
pub struct CancelPushes;

#[async_trait]
impl PushObserver for CancelPushes {
    async fn on_request(&self, _stream_id: u32, _request_headers: Vec<Header>) -> bool { true }

    async fn on_headers(&self, _stream_id: u32, _response_headers: Vec<Header>, _last: bool) -> bool {
        true
    }

    async fn on_data(&self, _stream_id: u32, _data: Bytes, _last: bool) -> bool { true }

    async fn on_reset(&self, _stream_id: u32, _code: ErrorCode) {}
}
