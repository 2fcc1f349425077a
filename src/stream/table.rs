//! The connection's table of active streams and its id allocator.

use std::collections::HashMap;

use super::Stream;
use crate::connection::Role;

/// Largest id the allocator hands out before the connection must be replaced.
pub const MAX_STREAM_ID: u32 = 0x3fff_ffff;

/// Active streams keyed by id, plus the id bookkeeping that goes with them.
///
/// Local ids share the allocator's parity and grow by two; ids are never
/// reused. Peer-initiated ids must have the opposite parity and exceed every
/// id previously accepted from the peer.
#[derive(Debug)]
pub struct StreamTable {
    streams: HashMap<u32, Stream>,
    next_stream_id: u32,
    last_good_stream_id: u32,
}

impl StreamTable {
    /// Create an empty table. Clients allocate odd ids from 3 (id 1 is left
    /// for an upgraded request); servers allocate even ids from 2.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            streams: HashMap::new(),
            next_stream_id: match role {
                Role::Client => 3,
                Role::Server => 2,
            },
            last_good_stream_id: 0,
        }
    }

    /// Allocate the next local id, or `None` once ids are exhausted.
    pub fn allocate_id(&mut self) -> Option<u32> {
        if self.next_stream_id > MAX_STREAM_ID {
            return None;
        }
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        Some(id)
    }

    #[cfg(test)]
    pub(crate) fn set_next_stream_id(&mut self, id: u32) { self.next_stream_id = id; }

    /// Id the allocator will hand out next.
    #[must_use]
    pub fn next_stream_id(&self) -> u32 { self.next_stream_id }

    /// Returns `true` if `id` was, or would be, allocated locally.
    #[must_use]
    pub fn is_local_id(&self, id: u32) -> bool { id % 2 == self.next_stream_id % 2 }

    /// Returns `true` if a HEADERS frame for the unknown `id` may open a new
    /// peer-initiated stream.
    #[must_use]
    pub fn accepts_peer_id(&self, id: u32) -> bool {
        id > self.last_good_stream_id && !self.is_local_id(id)
    }

    /// Highest peer-initiated id accepted so far.
    #[must_use]
    pub fn last_good_stream_id(&self) -> u32 { self.last_good_stream_id }

    /// Register a peer-initiated stream, advancing the last good id.
    pub fn accept(&mut self, stream: Stream) {
        self.last_good_stream_id = self.last_good_stream_id.max(stream.id());
        self.insert(stream);
    }

    /// Register a stream.
    pub fn insert(&mut self, stream: Stream) { self.streams.insert(stream.id(), stream); }

    /// Look up an active stream.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&Stream> { self.streams.get(&id) }

    /// Returns `true` if `id` is active.
    #[must_use]
    pub fn contains(&self, id: u32) -> bool { self.streams.contains_key(&id) }

    /// Remove a stream, returning it if it was active.
    pub fn remove(&mut self, id: u32) -> Option<Stream> { self.streams.remove(&id) }

    /// Number of active streams.
    #[must_use]
    pub fn len(&self) -> usize { self.streams.len() }

    /// Returns `true` if no streams are active.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.streams.is_empty() }

    /// Clones of every active stream.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Stream> { self.streams.values().cloned().collect() }

    /// Remove and return every active stream.
    pub fn drain(&mut self) -> Vec<Stream> { self.streams.drain().map(|(_, stream)| stream).collect() }

    /// Remove and return the locally-initiated streams the peer never
    /// processed, given the last id it acknowledged in a GOAWAY.
    pub fn remove_unprocessed(&mut self, last_stream_id: u32) -> Vec<Stream> {
        let doomed: Vec<u32> = self
            .streams
            .iter()
            .filter(|(id, stream)| **id > last_stream_id && stream.is_locally_initiated())
            .map(|(id, _)| *id)
            .collect();
        doomed.into_iter().filter_map(|id| self.streams.remove(&id)).collect()
    }
}
