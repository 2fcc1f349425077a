//! Flow-control windows.
//!
//! A [`Window`] is the byte credit a sender may spend before the receiver
//! grants more with WINDOW_UPDATE. The connection keeps one for itself and one
//! per stream, and a DATA frame spends from both. A [`ReadWindow`] tracks the
//! opposite direction: bytes the application consumed that have not yet been
//! acknowledged to the peer.
//!
//! Neither type blocks. Waiting for credit is the connection's job: it holds
//! the windows under its state lock and parks writers until a credit or a
//! stream removal wakes them.

/// Send-side credit counter.
///
/// The balance is signed because lowering `INITIAL_WINDOW_SIZE` mid-connection
/// may legitimately leave a stream owing credit. Reservations never push the
/// balance below zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    available: i64,
}

impl Window {
    /// Create a window holding `initial` bytes of credit.
    #[must_use]
    pub fn new(initial: u32) -> Self {
        Self {
            available: i64::from(initial),
        }
    }

    /// Current balance in bytes.
    #[must_use]
    pub fn available(&self) -> i64 { self.available }

    /// Returns `true` when at least one byte may be sent.
    #[must_use]
    pub fn has_credit(&self) -> bool { self.available > 0 }

    /// Add `delta` bytes of credit. Negative deltas come from settings changes.
    pub fn credit(&mut self, delta: i64) { self.available = self.available.saturating_add(delta); }

    /// Spend exactly `n` bytes that the caller already bounded by
    /// [`Window::available`].
    pub fn spend(&mut self, n: usize) {
        let n = i64::try_from(n).unwrap_or(i64::MAX);
        debug_assert!(n <= self.available, "spend must not overdraw the window");
        self.available -= n.min(self.available.max(0));
    }

    /// Largest grant this window allows for a request of `requested` bytes.
    #[must_use]
    pub fn grantable(&self, requested: usize) -> usize {
        usize::try_from(self.available.max(0)).map_or(requested, |available| requested.min(available))
    }
}

/// Grant for a reservation against both windows a DATA frame spends from.
///
/// Returns the number of bytes that may be written now: the least of the
/// request, the connection credit, the stream credit and the peer's frame size
/// limit. Both windows are debited by that amount. Returns `0`, leaving both
/// untouched, when either window is exhausted.
///
/// # Examples
///
/// ```
/// use muxwire::flow_control::{Window, reserve};
///
/// let mut connection = Window::new(100);
/// let mut stream = Window::new(40);
/// assert_eq!(reserve(&mut connection, &mut stream, 1_000, 16_384), 40);
/// assert_eq!(connection.available(), 60);
/// assert_eq!(reserve(&mut connection, &mut stream, 1_000, 16_384), 0);
/// ```
pub fn reserve(
    connection: &mut Window,
    stream: &mut Window,
    requested: usize,
    max_frame_size: usize,
) -> usize {
    if !connection.has_credit() || !stream.has_credit() {
        return 0;
    }
    let granted = stream.grantable(connection.grantable(requested.min(max_frame_size)));
    connection.spend(granted);
    stream.spend(granted);
    granted
}

/// Receive-side acknowledgement tracker.
///
/// Received bytes are outstanding until acknowledged. Consumed bytes
/// accumulate until they reach half the advertised window, at which point the
/// caller sends a WINDOW_UPDATE for the whole amount.
#[derive(Clone, Copy, Debug)]
pub struct ReadWindow {
    size: u32,
    outstanding: u32,
    unacknowledged: u32,
    threshold: u32,
}

impl ReadWindow {
    /// Create a tracker for a window of `size` bytes.
    #[must_use]
    pub fn new(size: u32) -> Self {
        Self {
            size,
            outstanding: 0,
            unacknowledged: 0,
            threshold: (size / 2).max(1),
        }
    }

    /// Record `n` received bytes. Returns `false` when the peer overran the
    /// window, in which case nothing is recorded.
    pub fn receive(&mut self, n: usize) -> bool {
        let Ok(n) = u32::try_from(n) else {
            return false;
        };
        match self.outstanding.checked_add(n) {
            Some(total) if total <= self.size => {
                self.outstanding = total;
                true
            }
            _ => false,
        }
    }

    /// Record `n` consumed bytes. Returns the increment to acknowledge, if the
    /// threshold has been reached.
    pub fn consume(&mut self, n: usize) -> Option<u32> {
        let n = u32::try_from(n).unwrap_or(u32::MAX);
        self.unacknowledged = self.unacknowledged.saturating_add(n);
        if self.unacknowledged < self.threshold {
            return None;
        }
        let increment = std::mem::take(&mut self.unacknowledged);
        self.outstanding = self.outstanding.saturating_sub(increment);
        Some(increment)
    }

    /// Bytes consumed but not yet acknowledged.
    #[must_use]
    pub fn unacknowledged(&self) -> u32 { self.unacknowledged }
}
