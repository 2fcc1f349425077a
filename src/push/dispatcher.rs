//! Per-id serial delivery of pushed-stream events.

use std::{
    fmt,
    sync::{Arc, Weak},
};

use bytes::Bytes;
use dashmap::{DashMap, DashSet, mapref::entry::Entry};
use tracing::{debug, trace};

use super::PushObserver;
use crate::{
    connection::Shared,
    error::ErrorCode,
    executor::{Executor, SerialQueue},
    frame::Header,
};

/// Open pushed ids and the ids the observer canceled.
///
/// A canceled id stays in `canceled` until the peer's final frame or
/// RST_STREAM for it arrives, so late frames are dropped instead of opening a
/// second queue for the same id.
#[derive(Default)]
struct Registry {
    queues: DashMap<u32, SerialQueue>,
    canceled: DashSet<u32>,
}

impl Registry {
    fn is_canceled(&self, stream_id: u32) -> bool { self.canceled.contains(&stream_id) }
}

/// Routes pushed-stream frames to a [`PushObserver`].
///
/// Each open pushed id owns a [`SerialQueue`]: events for one id run in
/// arrival order while different ids, and the connection's reader, proceed
/// independently. An id leaves the registry when the observer cancels it,
/// when its final frame has been delivered, or when it is reset. Jobs still
/// queued for an id when it is canceled are skipped.
pub struct PushDispatcher {
    observer: Arc<dyn PushObserver>,
    registry: Arc<Registry>,
    executor: Executor,
}

impl PushDispatcher {
    pub(crate) fn new(observer: Arc<dyn PushObserver>, executor: Executor) -> Self {
        Self {
            observer,
            registry: Arc::default(),
            executor,
        }
    }

    /// Returns `true` while `stream_id` is a tracked pushed stream.
    #[must_use]
    pub fn is_active(&self, stream_id: u32) -> bool { self.registry.queues.contains_key(&stream_id) }

    /// Number of pushed streams currently tracked.
    #[must_use]
    pub fn active_count(&self) -> usize { self.registry.queues.len() }

    /// Queue for a frame on `stream_id`, or `None` when the id was canceled.
    /// `terminal` marks the peer's last frame for the id, which retires the
    /// cancellation marker.
    fn route(&self, stream_id: u32, terminal: bool) -> Option<SerialQueue> {
        // The canceled check happens under the entry's shard lock: `cancel`
        // marks the id before removing its queue.
        match self.registry.queues.entry(stream_id) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(_) if self.registry.is_canceled(stream_id) => {
                if terminal {
                    self.registry.canceled.remove(&stream_id);
                }
                trace!(stream_id, "dropping frame for canceled pushed stream");
                None
            }
            Entry::Vacant(entry) => Some(
                entry
                    .insert(self.executor.serial_queue(format!("push-{stream_id}")))
                    .clone(),
            ),
        }
    }

    /// Handle a PUSH_PROMISE. Returns `false` if `stream_id` is already being
    /// pushed or was canceled, in which case the caller must reset it.
    pub(crate) fn request(&self, connection: Weak<Shared>, stream_id: u32, headers: Vec<Header>) -> bool {
        if self.is_active(stream_id) || self.registry.is_canceled(stream_id) {
            return false;
        }
        let Some(queue) = self.route(stream_id, false) else {
            return false;
        };
        let observer = Arc::clone(&self.observer);
        let registry = Arc::clone(&self.registry);
        queue.submit(async move {
            if registry.is_canceled(stream_id) {
                return;
            }
            if observer.on_request(stream_id, headers).await {
                cancel(&connection, &registry, stream_id).await;
            }
        });
        true
    }

    pub(crate) fn headers(
        &self,
        connection: Weak<Shared>,
        stream_id: u32,
        headers: Vec<Header>,
        last: bool,
    ) {
        let Some(queue) = self.route(stream_id, last) else {
            return;
        };
        let observer = Arc::clone(&self.observer);
        let registry = Arc::clone(&self.registry);
        queue.submit(async move {
            if registry.is_canceled(stream_id) {
                return;
            }
            if observer.on_headers(stream_id, headers, last).await {
                cancel(&connection, &registry, stream_id).await;
            } else if last {
                registry.queues.remove(&stream_id);
            }
        });
    }

    pub(crate) fn data(&self, connection: Weak<Shared>, stream_id: u32, data: Bytes, last: bool) {
        let Some(queue) = self.route(stream_id, last) else {
            return;
        };
        let observer = Arc::clone(&self.observer);
        let registry = Arc::clone(&self.registry);
        queue.submit(async move {
            if registry.is_canceled(stream_id) {
                return;
            }
            if observer.on_data(stream_id, data, last).await {
                cancel(&connection, &registry, stream_id).await;
            } else if last {
                registry.queues.remove(&stream_id);
            }
        });
    }

    pub(crate) fn reset(&self, stream_id: u32, code: ErrorCode) {
        let Some(queue) = self.route(stream_id, true) else {
            return;
        };
        let observer = Arc::clone(&self.observer);
        let registry = Arc::clone(&self.registry);
        queue.submit(async move {
            if registry.is_canceled(stream_id) {
                return;
            }
            observer.on_reset(stream_id, code).await;
            registry.queues.remove(&stream_id);
        });
    }
}

async fn cancel(connection: &Weak<Shared>, registry: &Registry, stream_id: u32) {
    debug!(stream_id, "pushed stream canceled by observer");
    registry.canceled.insert(stream_id);
    registry.queues.remove(&stream_id);
    let Some(shared) = connection.upgrade() else {
        return;
    };
    if let Err(e) = shared.send_reset(stream_id, ErrorCode::Cancel).await {
        debug!(stream_id, error = %e, "failed to reset canceled pushed stream");
    }
}

impl fmt::Debug for PushDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushDispatcher")
            .field("active", &self.registry.queues.len())
            .field("canceled", &self.registry.canceled.len())
            .finish_non_exhaustive()
    }
}
