//! Channel counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one channel (or one lightweight listener).
#[derive(Debug, Default)]
pub struct ChannelStats {
    /// Requests that registered a waiter
    pub requests_registered: AtomicU64,
    /// Requests settled by a matching response
    pub requests_completed: AtomicU64,
    /// Requests abandoned on timeout
    pub requests_timed_out: AtomicU64,
    /// Requests dropped by the caller or failed on dispose
    pub requests_cancelled: AtomicU64,
    /// Responses with no waiter
    pub unmatched_responses: AtomicU64,
    /// Handlers that returned an error or panicked
    pub handler_failures: AtomicU64,
    /// Handshake attempts refused after the channel was established
    pub handshakes_rejected: AtomicU64,
    /// Messages dropped by the identity guard
    pub messages_filtered: AtomicU64,
}

impl ChannelStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters out.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_registered: self.requests_registered.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            requests_cancelled: self.requests_cancelled.load(Ordering::Relaxed),
            unmatched_responses: self.unmatched_responses.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            handshakes_rejected: self.handshakes_rejected.load(Ordering::Relaxed),
            messages_filtered: self.messages_filtered.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ChannelStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requests_registered: u64,
    pub requests_completed: u64,
    pub requests_timed_out: u64,
    pub requests_cancelled: u64,
    pub unmatched_responses: u64,
    pub handler_failures: u64,
    pub handshakes_rejected: u64,
    pub messages_filtered: u64,
}
