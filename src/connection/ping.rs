//! Round-trip probes.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    time::{Instant, timeout},
};

use super::Shared;
use crate::{
    error::{ConnectionError, Result},
    frame::Frame,
};

/// Second payload word of every PING this crate originates.
pub const PING_PAYLOAD2: u32 = 0x4f4b_6f6b;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PingState {
    Unsent,
    Sent(Instant),
    Answered(Duration),
    Canceled,
}

/// An outstanding PING.
///
/// The ping is answered when the peer echoes its payload, or canceled if the
/// connection closes first.
#[derive(Clone, Debug)]
pub struct Ping {
    id: u32,
    state: Arc<watch::Sender<PingState>>,
}

impl Ping {
    pub(crate) fn new(id: u32) -> Self {
        Self {
            id,
            state: Arc::new(watch::Sender::new(PingState::Unsent)),
        }
    }

    /// Ping identifier, carried as the first payload word.
    #[must_use]
    pub fn id(&self) -> u32 { self.id }

    pub(crate) fn mark_sent(&self) {
        self.state.send_if_modified(|state| {
            if *state != PingState::Unsent {
                return false;
            }
            *state = PingState::Sent(Instant::now());
            true
        });
    }

    pub(crate) fn receive(&self) -> bool {
        self.state.send_if_modified(|state| {
            let PingState::Sent(at) = *state else {
                return false;
            };
            *state = PingState::Answered(at.elapsed());
            true
        })
    }

    pub(crate) fn cancel(&self) {
        self.state.send_if_modified(|state| {
            if matches!(state, PingState::Answered(_) | PingState::Canceled) {
                return false;
            }
            *state = PingState::Canceled;
            true
        });
    }

    /// Wait for the answer. Returns the round-trip time, or `None` if the ping
    /// was canceled.
    pub async fn round_trip_time(&self) -> Option<Duration> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|state| matches!(state, PingState::Answered(_) | PingState::Canceled))
            .await
            .ok()?;
        match state {
            PingState::Answered(elapsed) => Some(elapsed),
            _ => None,
        }
    }

    /// Like [`Ping::round_trip_time`], giving up after `limit`.
    pub async fn round_trip_time_within(&self, limit: Duration) -> Option<Duration> {
        timeout(limit, self.round_trip_time()).await.ok().flatten()
    }
}

impl Shared {
    pub(crate) async fn ping(&self) -> Result<Ping> {
        let ping = {
            let mut state = self.lock_state();
            if state.shutdown {
                return Err(ConnectionError::Shutdown);
            }
            let ping = Ping::new(state.next_ping_id);
            state.next_ping_id += 2;
            state.pings.insert(ping.id(), ping.clone());
            ping
        };
        ping.mark_sent();
        let sent = self
            .writer
            .send(Frame::Ping {
                ack: false,
                payload1: ping.id(),
                payload2: PING_PAYLOAD2,
            })
            .await;
        if let Err(e) = sent {
            self.lock_state().pings.remove(&ping.id());
            ping.cancel();
            return Err(e);
        }
        Ok(ping)
    }

    /// Match a PING ack against an outstanding ping. Acks whose second word
    /// is not [`PING_PAYLOAD2`] answer a ping this connection never sent.
    pub(crate) fn receive_ping_ack(&self, payload1: u32, payload2: u32) {
        let ping = if payload2 == PING_PAYLOAD2 {
            self.lock_state().pings.remove(&payload1)
        } else {
            None
        };
        match ping {
            Some(ping) if ping.receive() => crate::metrics::inc_pings_answered(),
            _ => tracing::debug!(ping_id = payload1, "ignoring unsolicited PING ack"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answered_ping_reports_elapsed_time() {
        let ping = Ping::new(1);
        ping.mark_sent();
        assert!(ping.receive());
        assert!(!ping.receive());
        assert!(ping.round_trip_time().await.is_some());
    }

    #[tokio::test]
    async fn canceled_ping_reports_nothing() {
        let ping = Ping::new(3);
        ping.mark_sent();
        ping.cancel();
        assert!(!ping.receive());
        assert_eq!(ping.round_trip_time().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_ping_times_out() {
        let ping = Ping::new(5);
        ping.mark_sent();
        assert_eq!(ping.round_trip_time_within(Duration::from_millis(50)).await, None);
    }
}
