//! Pending Request Store - the correlation engine.
//!
//! Maps correlation IDs to callers waiting for a response.
//!
//! Flow:
//! 1. `trigger` calls `register()` to get an ID and a oneshot receiver
//! 2. The request is posted carrying that ID
//! 3. The listener sees a `response` with the same ID and calls `complete()`
//! 4. The caller awaits the [`PendingResponse`], which may time out first
//!
//! Correlation is by ID only. Responses may arrive in any order.

use crate::domain::config::UnmatchedResponsePolicy;
use crate::domain::correlation::CorrelationId;
use crate::domain::error::ChannelError;
use crate::domain::stats::ChannelStats;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time::Sleep;
use tracing::{debug, error, warn};

type Settlement = Result<Value, ChannelError>;

/// A request waiting for its response
struct PendingRequest {
    /// Channel to deliver the settlement
    sender: oneshot::Sender<Settlement>,
    /// When the request was registered
    created_at: Instant,
    /// Event name (for logging)
    event: String,
}

/// Pending request store.
pub struct PendingRequestStore {
    /// Map of correlation ID to pending request
    pending: DashMap<CorrelationId, PendingRequest>,
    /// Handling of responses nobody waits for
    policy: UnmatchedResponsePolicy,
    /// Counters
    stats: Arc<ChannelStats>,
}

impl PendingRequestStore {
    pub fn new(policy: UnmatchedResponsePolicy, stats: Arc<ChannelStats>) -> Self {
        Self {
            pending: DashMap::new(),
            policy,
            stats,
        }
    }

    /// Register a pending request and get a receiver for its settlement.
    pub fn register(&self, event: &str) -> (CorrelationId, oneshot::Receiver<Settlement>) {
        let correlation_id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();

        let request = PendingRequest {
            sender: tx,
            created_at: Instant::now(),
            event: event.to_string(),
        };

        self.pending.insert(correlation_id, request);
        ChannelStats::bump(&self.stats.requests_registered);

        debug!(
            correlation_id = %correlation_id,
            event = event,
            "Registered pending request"
        );

        (correlation_id, rx)
    }

    /// Settle a pending request with the content of its response.
    ///
    /// `Err` carries the remote error string. Returns false if nobody was
    /// waiting, in which case the unmatched-response policy applies.
    pub fn complete(&self, correlation_id: CorrelationId, result: Result<Value, String>) -> bool {
        let Some((_, pending)) = self.pending.remove(&correlation_id) else {
            self.report_unmatched(correlation_id);
            return false;
        };

        let response_time = pending.created_at.elapsed();
        let settlement = result.map_err(ChannelError::Remote);

        match pending.sender.send(settlement) {
            Ok(()) => {
                ChannelStats::bump(&self.stats.requests_completed);
                debug!(
                    correlation_id = %correlation_id,
                    event = pending.event,
                    response_time_ms = response_time.as_millis(),
                    "Completed pending request"
                );
                true
            }
            Err(_) => {
                // Receiver was dropped between lookup and send
                ChannelStats::bump(&self.stats.requests_cancelled);
                debug!(
                    correlation_id = %correlation_id,
                    event = pending.event,
                    "Pending request receiver dropped"
                );
                false
            }
        }
    }

    /// Settle from the `uuid` a response carried on the wire.
    ///
    /// An id that is not one of ours counts as unmatched.
    pub fn complete_wire(&self, uuid: &str, result: Result<Value, String>) -> bool {
        match CorrelationId::parse(uuid) {
            Ok(correlation_id) => self.complete(correlation_id, result),
            Err(_) => {
                self.report_unmatched(uuid);
                false
            }
        }
    }

    fn report_unmatched(&self, correlation_id: impl fmt::Display) {
        ChannelStats::bump(&self.stats.unmatched_responses);
        match self.policy {
            UnmatchedResponsePolicy::Ignore => {}
            UnmatchedResponsePolicy::Warn => warn!(
                correlation_id = %correlation_id,
                "Response for unknown or expired correlation ID"
            ),
            UnmatchedResponsePolicy::Error => error!(
                correlation_id = %correlation_id,
                "Response for unknown or expired correlation ID"
            ),
        }
    }

    /// Drop a waiter whose timeout elapsed.
    pub fn expire(&self, correlation_id: &CorrelationId) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, pending)) => {
                ChannelStats::bump(&self.stats.requests_timed_out);
                warn!(
                    correlation_id = %correlation_id,
                    event = pending.event,
                    elapsed_ms = pending.created_at.elapsed().as_millis(),
                    "Pending request timed out"
                );
                true
            }
            None => false,
        }
    }

    /// Cancel a pending request
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            ChannelStats::bump(&self.stats.requests_cancelled);
            true
        } else {
            false
        }
    }

    /// Fail every pending request with [`ChannelError::Closed`].
    ///
    /// Returns the number of requests failed.
    pub fn fail_all(&self) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;

        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.sender.send(Err(ChannelError::Closed));
                ChannelStats::bump(&self.stats.requests_cancelled);
                failed += 1;
            }
        }

        failed
    }

    /// Get number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a correlation ID is pending
    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }
}

/// The response to a `trigger`, still in flight.
///
/// Resolves with the response payload, or fails with
/// [`ChannelError::Remote`], [`ChannelError::Timeout`] or
/// [`ChannelError::Closed`]. Settles exactly once.
///
/// Without a timeout it waits for as long as the peer stays silent; a
/// handler that never answers keeps it pending forever. Dropping it
/// unsettled withdraws the waiter, so a late response is then unmatched.
pub struct PendingResponse {
    id: CorrelationId,
    event: String,
    rx: oneshot::Receiver<Settlement>,
    timeout: Option<Duration>,
    deadline: Option<tokio::time::Instant>,
    sleep: Option<Pin<Box<Sleep>>>,
    store: Arc<PendingRequestStore>,
    settled: bool,
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("timeout", &self.timeout)
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}

impl PendingResponse {
    pub(crate) fn new(
        id: CorrelationId,
        event: &str,
        rx: oneshot::Receiver<Settlement>,
        timeout: Option<Duration>,
        store: Arc<PendingRequestStore>,
    ) -> Self {
        Self {
            id,
            event: event.to_string(),
            rx,
            timeout,
            // A timeout too large to represent never fires.
            deadline: timeout.and_then(|t| tokio::time::Instant::now().checked_add(t)),
            sleep: None,
            store,
            settled: false,
        }
    }

    /// Correlation ID of the request.
    pub fn id(&self) -> CorrelationId {
        self.id
    }
}

impl Future for PendingResponse {
    type Output = Result<Value, ChannelError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if let Poll::Ready(result) = Pin::new(&mut this.rx).poll(cx) {
            this.settled = true;
            return Poll::Ready(result.unwrap_or(Err(ChannelError::Closed)));
        }

        if let (Some(timeout), Some(deadline)) = (this.timeout, this.deadline) {
            // The timer is armed on first poll; the deadline itself dates from registration.
            let sleep = this
                .sleep
                .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));
            if sleep.as_mut().poll(cx).is_ready() {
                this.settled = true;

                if !this.store.expire(&this.id) {
                    // Settled concurrently; the value is already queued.
                    if let Ok(result) = this.rx.try_recv() {
                        return Poll::Ready(result);
                    }
                }

                return Poll::Ready(Err(ChannelError::Timeout {
                    event: this.event.clone(),
                    timeout,
                }));
            }
        }

        Poll::Pending
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if !self.settled && self.store.cancel(&self.id) {
            debug!(correlation_id = %self.id, event = self.event, "Pending request dropped by caller");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn store() -> Arc<PendingRequestStore> {
        Arc::new(PendingRequestStore::new(
            UnmatchedResponsePolicy::Warn,
            Arc::new(ChannelStats::default()),
        ))
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        let store = store();

        let (id, rx) = store.register("ping");
        assert!(store.is_pending(&id));
        assert_eq!(store.pending_count(), 1);

        assert!(store.complete(id, Ok(json!(42))));

        let response = PendingResponse::new(id, "ping", rx, None, store.clone());
        assert_eq!(response.await.unwrap(), json!(42));
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_error() {
        let store = store();
        let (id, rx) = store.register("ping");

        store.complete(id, Err("boom".into()));

        let response = PendingResponse::new(id, "ping", rx, None, store.clone());
        assert_eq!(response.await, Err(ChannelError::Remote("boom".into())));
    }

    #[tokio::test]
    async fn test_complete_unknown_id() {
        let store = store();
        assert!(!store.complete(CorrelationId::new(), Ok(json!(null))));
        assert_eq!(store.stats.unmatched_responses.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_waiter() {
        let store = store();
        let (id, rx) = store.register("slow");
        let started = tokio::time::Instant::now();

        let response =
            PendingResponse::new(id, "slow", rx, Some(Duration::from_millis(100)), store.clone());
        let result = response.await;

        assert!(matches!(result, Err(ChannelError::Timeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(!store.is_pending(&id));

        // A late response has no observable effect beyond the counter.
        assert!(!store.complete(id, Ok(json!("late"))));
        assert_eq!(store.stats.requests_timed_out.load(Ordering::Relaxed), 1);
        assert_eq!(store.stats.unmatched_responses.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_timeout_waits_for_response() {
        let store = store();
        let (id, rx) = store.register("slow");

        let response = PendingResponse::new(id, "slow", rx, Some(Duration::MAX), store.clone());
        let settle = {
            let store = store.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                store.complete(id, Ok(json!("eventually")))
            }
        };

        let (result, completed) = tokio::join!(response, settle);
        assert!(completed);
        assert_eq!(result.unwrap(), json!("eventually"));
        assert_eq!(store.stats.requests_timed_out.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_complete_wire_with_foreign_id() {
        let store = store();
        let (id, rx) = store.register("ping");

        assert!(!store.complete_wire("req-1", Ok(json!(1))));
        assert_eq!(store.stats.unmatched_responses.load(Ordering::Relaxed), 1);
        assert!(store.is_pending(&id));

        assert!(store.complete_wire(&id.to_string(), Ok(json!(2))));
        let response = PendingResponse::new(id, "ping", rx, None, store.clone());
        assert_eq!(response.await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_drop_cancels_waiter() {
        let store = store();
        let (id, rx) = store.register("ping");

        let response = PendingResponse::new(id, "ping", rx, None, store.clone());
        drop(response);

        assert!(!store.is_pending(&id));
        assert_eq!(store.stats.requests_cancelled.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let store = store();
        let (id1, rx1) = store.register("a");
        let (_id2, _rx2) = store.register("b");

        assert_eq!(store.fail_all(), 2);
        assert_eq!(store.pending_count(), 0);

        let response = PendingResponse::new(id1, "a", rx1, None, store.clone());
        assert_eq!(response.await, Err(ChannelError::Closed));
    }

    #[test]
    fn test_cancel() {
        let store = store();
        let (id, _rx) = store.register("ping");

        assert!(store.cancel(&id));
        assert!(!store.is_pending(&id));

        // Cancel again should return false
        assert!(!store.cancel(&id));
    }
}
