//! # Window Transport
//!
//! In-process model of the shared message source two windows talk over.

use crate::subscription::Subscription;
use crate::transport::{Packet, Transport, TransportError};
use crate::DEFAULT_CHANNEL_CAPACITY;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// One side of a shared, broadcast-style transport.
///
/// `post` delivers to every current listener on the other side. Listeners
/// registered later do not see earlier packets, and a packet posted while
/// nobody listens is lost, just like a message event nobody handles.
pub struct WindowTransport {
    /// Origin of this window.
    origin: String,

    /// Packets posted to this window.
    inbox: broadcast::Sender<Packet>,

    /// Packets posted by this window land here.
    peer: broadcast::Sender<Packet>,

    /// Total packets posted from this window.
    packets_posted: AtomicU64,
}

impl WindowTransport {
    /// Create two linked windows with default capacity.
    #[must_use]
    pub fn pair(origin_a: impl Into<String>, origin_b: impl Into<String>) -> (Self, Self) {
        Self::with_capacity(origin_a, origin_b, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create two linked windows with a per-listener buffer of `capacity`.
    #[must_use]
    pub fn with_capacity(
        origin_a: impl Into<String>,
        origin_b: impl Into<String>,
        capacity: usize,
    ) -> (Self, Self) {
        let (inbox_a, _) = broadcast::channel(capacity);
        let (inbox_b, _) = broadcast::channel(capacity);

        let a = Self {
            origin: origin_a.into(),
            inbox: inbox_a.clone(),
            peer: inbox_b.clone(),
            packets_posted: AtomicU64::new(0),
        };
        let b = Self {
            origin: origin_b.into(),
            inbox: inbox_b,
            peer: inbox_a,
            packets_posted: AtomicU64::new(0),
        };
        (a, b)
    }

    /// Deliver a packet to this window's own listeners, as if some third
    /// context had posted it here.
    pub fn deliver(&self, packet: Packet) -> usize {
        self.inbox.send(packet).unwrap_or(0)
    }

    /// Number of listeners currently registered on this window.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inbox.receiver_count()
    }

    /// Total packets posted from this window.
    #[must_use]
    pub fn packets_posted(&self) -> u64 {
        self.packets_posted.load(Ordering::Relaxed)
    }
}

impl Transport for WindowTransport {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn post(&self, packet: Packet) -> Result<(), TransportError> {
        self.packets_posted.fetch_add(1, Ordering::Relaxed);

        match self.peer.send(packet) {
            Ok(receivers) => {
                debug!(origin = %self.origin, receivers, "Packet posted");
            }
            Err(_) => {
                warn!(origin = %self.origin, "Packet dropped (no listeners)");
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> Result<Subscription, TransportError> {
        debug!(origin = %self.origin, "New window listener");
        Ok(Subscription::from_window(self.inbox.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Port;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_post_reaches_peer_only() {
        let (a, b) = WindowTransport::pair("https://host", "https://frame");
        let mut at_a = a.subscribe().unwrap();
        let mut at_b = b.subscribe().unwrap();

        a.post(Packet::new(json!("hi"))).unwrap();

        let packet = timeout(Duration::from_millis(100), at_b.recv())
            .await
            .expect("timeout")
            .expect("packet");
        assert_eq!(packet.data, json!("hi"));
        assert!(matches!(at_a.try_recv(), Ok(None)));
    }

    #[test]
    fn test_every_listener_sees_packet() {
        let (a, b) = WindowTransport::pair("https://host", "https://frame");
        let mut first = b.subscribe().unwrap();
        let mut second = b.subscribe().unwrap();

        a.post(Packet::new(json!(7))).unwrap();

        assert!(first.try_recv().unwrap().is_some());
        assert!(second.try_recv().unwrap().is_some());
    }

    #[test]
    fn test_post_without_listeners_is_dropped() {
        let (a, _b) = WindowTransport::pair("https://host", "https://frame");
        assert!(a.post(Packet::new(json!(null))).is_ok());
        assert_eq!(a.packets_posted(), 1);
    }

    #[test]
    fn test_subscription_drop_releases_listener() {
        let (_a, b) = WindowTransport::pair("https://host", "https://frame");
        {
            let _one = b.subscribe().unwrap();
            let _two = b.subscribe().unwrap();
            assert_eq!(b.subscriber_count(), 2);
        }
        assert_eq!(b.subscriber_count(), 0);
    }

    #[test]
    fn test_transferred_port_arrives() {
        let (a, b) = WindowTransport::pair("https://host", "https://frame");
        let mut sub = b.subscribe().unwrap();
        let (kept, sent) = Port::pair("https://host");

        a.post(Packet::with_port(json!("open"), sent.clone())).unwrap();

        let packet = sub.try_recv().unwrap().expect("packet");
        assert_eq!(packet.ports.len(), 1);
        assert!(packet.ports[0].same_end(&sent));
        assert!(!packet.ports[0].same_end(&kept));
    }

    #[test]
    fn test_deliver_local() {
        let (_a, b) = WindowTransport::pair("https://host", "https://frame");
        let mut sub = b.subscribe().unwrap();

        assert_eq!(b.deliver(Packet::new(json!("stray"))), 1);
        assert!(sub.try_recv().unwrap().is_some());
    }

    #[test]
    fn test_origin() {
        let (a, b) = WindowTransport::pair("https://host", "https://frame");
        assert_eq!(a.origin(), "https://host");
        assert_eq!(b.origin(), "https://frame");
    }
}
