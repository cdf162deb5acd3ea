//! Inbound message routing.
//!
//! One listener task per attached transport. Every packet goes through the
//! same steps:
//!
//! 1. Decode the envelope; anything else is ignored
//! 2. Identity guard: drop messages tagged for another channel
//! 3. Responses settle their pending request
//! 4. Handshake traffic goes to the handshake in progress
//! 5. Everything else is dispatched to its handler, if one exists

use crate::channel::handshake::{ConnectAcceptor, IdentityWaiter};
use crate::dispatch::{spawn_invocation, HandlerTable};
use crate::domain::{ChannelIdentity, ChannelStats, Message, PendingRequestStore, CONNECT_EVENT};
use crate::outbound::Outbound;
use bridge_transport::{Packet, Subscription};
use std::sync::Arc;
use tracing::{debug, trace};

/// Channel-id handshake state the listener has to feed.
#[derive(Clone, Default)]
pub(crate) enum HandshakeHook {
    #[default]
    None,
    /// Answer `connect` requests with a fresh channel id.
    Accept(Arc<ConnectAcceptor>),
    /// Adopt the channel id carried by the reply to our `connect`.
    Await(Arc<IdentityWaiter>),
}

#[derive(Clone)]
pub(crate) struct Router {
    pub(crate) pending: Arc<PendingRequestStore>,
    pub(crate) handlers: Arc<HandlerTable>,
    pub(crate) identity: Arc<ChannelIdentity>,
    pub(crate) stats: Arc<ChannelStats>,
    pub(crate) outbound: Outbound,
    pub(crate) hook: HandshakeHook,
}

impl Router {
    /// Route packets until the transport closes.
    pub(crate) async fn run(self, mut subscription: Subscription) {
        while let Some(packet) = subscription.recv().await {
            self.route(packet);
        }
        debug!("Transport closed, listener stopped");
    }

    pub(crate) fn route(&self, packet: Packet) {
        let Some(message) = Message::decode(&packet.data) else {
            trace!("Ignoring packet without a message envelope");
            return;
        };

        if !self.identity.matches_channel(message.channel_id.as_deref()) {
            ChannelStats::bump(&self.stats.messages_filtered);
            trace!(
                correlation_id = %message.uuid,
                event = %message.kind,
                "Ignoring message for another channel"
            );
            return;
        }

        if message.is_response() {
            if let HandshakeHook::Await(waiter) = &self.hook {
                waiter.observe(&message, &self.identity);
            }

            let Message {
                uuid, payload, error, ..
            } = message;
            let result = match error {
                Some(err) => Err(err),
                None => Ok(payload),
            };
            self.pending.complete_wire(&uuid, result);
            return;
        }

        if message.kind == CONNECT_EVENT {
            if let HandshakeHook::Accept(acceptor) = &self.hook {
                acceptor.accept(&message, &self.outbound, &self.identity, &self.stats);
                return;
            }
        }

        match self.handlers.lookup(&message.kind) {
            Some(handler) => {
                spawn_invocation(handler, message, self.outbound.clone(), self.stats.clone())
            }
            None => debug!(
                correlation_id = %message.uuid,
                event = %message.kind,
                "No handler registered, dropping event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Handler;
    use crate::domain::{CorrelationId, UnmatchedResponsePolicy};
    use bridge_transport::{Transport, WindowTransport};
    use serde_json::json;

    struct Fixture {
        router: Router,
        peer: Subscription,
    }

    fn fixture() -> Fixture {
        let (local, remote) = WindowTransport::pair("https://frame", "https://host");
        let peer = remote.subscribe().unwrap();
        let stats = Arc::new(ChannelStats::default());
        let identity = Arc::new(ChannelIdentity::new());

        let router = Router {
            pending: Arc::new(PendingRequestStore::new(
                UnmatchedResponsePolicy::Ignore,
                stats.clone(),
            )),
            handlers: Arc::new(HandlerTable::new([])),
            identity: identity.clone(),
            stats,
            outbound: Outbound::new(Arc::new(local), "https://frame", Some(identity)),
            hook: HandshakeHook::None,
        };
        Fixture { router, peer }
    }

    fn packet(message: Message) -> Packet {
        Packet::new(message.encode().unwrap())
    }

    #[tokio::test]
    async fn test_response_settles_waiter() {
        let Fixture { router, .. } = fixture();
        let (id, rx) = router.pending.register("ping");

        router.route(packet(Message::response(id, "https://host", json!(42))));

        assert_eq!(rx.await.unwrap().unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_foreign_channel_filtered() {
        let Fixture { router, .. } = fixture();
        router.identity.establish("mine").unwrap();
        let (id, _rx) = router.pending.register("ping");

        let mut foreign = Message::response(id, "https://host", json!(1));
        foreign.channel_id = Some("theirs".into());
        router.route(packet(foreign));

        assert!(router.pending.is_pending(&id));
        assert_eq!(router.stats.snapshot().messages_filtered, 1);
    }

    #[tokio::test]
    async fn test_event_dispatched_and_answered() {
        let Fixture { router, mut peer } = fixture();
        let _registration = router
            .handlers
            .register(
                "ping",
                Handler::auto(|payload, _origin| async move {
                    Ok(json!(payload.as_i64().unwrap_or_default() + 1))
                }),
            )
            .unwrap();

        let id = CorrelationId::new();
        router.route(packet(Message::request("ping", id, "https://host", json!(41))));

        let reply = Message::decode(&peer.recv().await.unwrap().data).unwrap();
        assert!(reply.is_response());
        assert_eq!(reply.uuid, id);
        assert_eq!(reply.payload, json!(42));
    }

    #[tokio::test]
    async fn test_request_with_plain_string_id_answered() {
        let Fixture { router, mut peer } = fixture();
        let _registration = router
            .handlers
            .register("ping", Handler::auto(|payload, _origin| async move { Ok(payload) }))
            .unwrap();

        router.route(Packet::new(json!({
            "type": "ping",
            "uuid": "req-1",
            "origin": "https://host",
            "payload": 7
        })));

        let reply = Message::decode(&peer.recv().await.unwrap().data).unwrap();
        assert_eq!(reply.uuid, "req-1");
        assert_eq!(reply.payload, json!(7));
    }

    #[tokio::test]
    async fn test_connect_with_plain_string_id_accepted() {
        let Fixture { mut router, mut peer } = fixture();
        let (assigned, on_assigned) = tokio::sync::oneshot::channel();
        router.hook = HandshakeHook::Accept(Arc::new(ConnectAcceptor::new(assigned)));

        router.route(Packet::new(json!({
            "type": "connect",
            "uuid": "req-1",
            "origin": "https://host",
            "payload": null
        })));

        let reply = Message::decode(&peer.recv().await.unwrap().data).unwrap();
        let channel_id = on_assigned.await.unwrap();
        assert_eq!(reply.uuid, "req-1");
        assert_eq!(reply.payload, json!(channel_id));
        assert_eq!(router.identity.channel_id(), Some(channel_id.as_str()));
    }

    #[tokio::test]
    async fn test_response_with_foreign_id_is_unmatched() {
        let Fixture { router, .. } = fixture();
        let (id, _rx) = router.pending.register("ping");

        router.route(packet(Message::response("req-1", "https://host", json!(1))));

        assert!(router.pending.is_pending(&id));
        assert_eq!(router.stats.snapshot().unmatched_responses, 1);
    }

    #[tokio::test]
    async fn test_unknown_event_and_junk_ignored() {
        let Fixture { router, mut peer } = fixture();

        router.route(Packet::new(json!("bridge-editor:connect")));
        router.route(packet(Message::request(
            "nobody-listens",
            CorrelationId::new(),
            "https://host",
            json!(null),
        )));

        assert!(peer.try_recv().unwrap().is_none());
    }
}
