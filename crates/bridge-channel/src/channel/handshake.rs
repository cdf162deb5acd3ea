//! Handshakes: how two endpoints agree on a private conversation.
//!
//! ```text
//! DedicatedPort   connect: open pipe ──<ns>:connect + port──▶ open: adopt port
//!                 connect ◀────────── <ns>:connected (request over pipe)
//!
//! NegotiatedPort  connect: <ns>:connection-request (repeated) ──▶ open
//!                 connect ◀── <ns>:connect + port ── open: open pipe
//!                 connect ── <ns>:connected (request over pipe) ──▶ open
//!
//! ChannelId       connect ── connect request ──▶ open: new channel id
//!                 connect ◀── response { payload: id } (untagged)
//! ```
//!
//! Port handshakes wait as long as it takes for the peer to show up. The
//! channel-id handshake is bounded by `handshake_timeout`.

use super::listener::HandshakeHook;
use super::Channel;
use crate::dispatch::{Handler, HandlerResult};
use crate::domain::{
    ChannelError, ChannelIdentity, ChannelResult, ChannelStats, CorrelationId, Message,
    CONNECT_EVENT,
};
use crate::outbound::Outbound;
use bridge_transport::{Packet, Port, Subscription, Transport, TransportError};
use futures::future::{ready, Ready};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Accepting side of the channel-id handshake.
pub(crate) struct ConnectAcceptor {
    assigned: Mutex<Option<oneshot::Sender<String>>>,
}

impl ConnectAcceptor {
    pub(crate) fn new(assigned: oneshot::Sender<String>) -> Self {
        Self {
            assigned: Mutex::new(Some(assigned)),
        }
    }

    /// Answer a `connect` request.
    ///
    /// The first one gets a fresh id; later ones are refused without a reply
    /// since the id never changes once agreed.
    pub(crate) fn accept(
        &self,
        request: &Message,
        outbound: &Outbound,
        identity: &ChannelIdentity,
        stats: &ChannelStats,
    ) {
        let channel_id = CorrelationId::new().to_string();
        if let Err(err) = identity.establish(channel_id.clone()) {
            ChannelStats::bump(&stats.handshakes_rejected);
            warn!(
                correlation_id = %request.uuid,
                origin = %request.origin,
                error = %err,
                "Rejected connect request"
            );
            return;
        }

        // Untagged so the initiator, which has no id yet, accepts it.
        let reply = Message::response(request.uuid.clone(), outbound.origin(), json!(channel_id));
        if let Err(err) = outbound.send_unstamped(reply) {
            warn!(correlation_id = %request.uuid, error = %err, "Failed to answer connect request");
        }

        if let Some(assigned) = self.assigned.lock().take() {
            let _ = assigned.send(channel_id);
        }
    }
}

/// Initiating side of the channel-id handshake.
#[derive(Default)]
pub(crate) struct IdentityWaiter {
    request: Mutex<Option<CorrelationId>>,
}

impl IdentityWaiter {
    /// Set the correlation id of our `connect` request.
    pub(crate) fn expect(&self, request: CorrelationId) {
        *self.request.lock() = Some(request);
    }

    /// Adopt the id carried by the reply to our request.
    ///
    /// Runs in the listener before the reply settles its waiter, so the
    /// identity is in place when `connect()` resumes.
    pub(crate) fn observe(&self, response: &Message, identity: &ChannelIdentity) {
        let mut request = self.request.lock();
        match *request {
            Some(expected) if response.uuid == expected && response.error.is_none() => {}
            _ => return,
        }
        request.take();

        match response.payload.as_str() {
            Some(channel_id) => {
                if let Err(err) = identity.establish(channel_id) {
                    warn!(error = %err, "Ignoring second channel id");
                }
            }
            None => warn!(correlation_id = %response.uuid, "Connect reply without a channel id"),
        }
    }
}

/// Handler that fires `signal` on its first call and answers with null.
fn acknowledge_once(
    signal: oneshot::Sender<()>,
) -> impl Fn(Value, String) -> Ready<HandlerResult> + Send + Sync + 'static {
    let signal = Mutex::new(Some(signal));
    move |_payload, _origin| {
        if let Some(signal) = signal.lock().take() {
            let _ = signal.send(());
        }
        ready(Ok(Value::Null))
    }
}

/// Take the pipe carried by a `signal` packet, if it is one we can start.
fn adopt_port(packet: Packet, signal: &str) -> Option<(Port, Subscription)> {
    if packet.data.as_str() != Some(signal) {
        return None;
    }

    let Some(port) = packet.ports.into_iter().next() else {
        debug!(signal = signal, "Handshake signal without a port");
        return None;
    };

    match port.subscribe() {
        Ok(subscription) => Some((port, subscription)),
        Err(TransportError::AlreadyStarted) => {
            debug!(signal = signal, "Port already adopted by another listener");
            None
        }
        Err(err) => {
            warn!(signal = signal, error = %err, "Cannot adopt port");
            None
        }
    }
}

fn transport_gone() -> ChannelError {
    ChannelError::ConnectionFailed("transport closed during handshake".into())
}

impl Channel {
    /// `connect()` in dedicated-port mode.
    pub(super) async fn connect_dedicated(&self) -> ChannelResult<()> {
        let signals = &self.inner.signals;
        let (acknowledged, on_ack) = oneshot::channel();
        let registration = self
            .inner
            .handlers
            .register_internal(&signals.connected, Handler::auto(acknowledge_once(acknowledged)))?;

        let result: ChannelResult<()> = async {
            let (local, remote) = Port::pair(self.origin());
            let subscription = local.subscribe()?;
            self.attach(Arc::new(local), subscription, HandshakeHook::None);

            self.inner
                .shared
                .post(Packet::with_port(json!(signals.connect), remote))?;
            debug!(origin = %self.origin(), "Offered dedicated port");

            on_ack.await.map_err(|_| ChannelError::Closed)
        }
        .await;

        registration.dispose();
        result
    }

    /// `open()` in dedicated-port mode.
    pub(super) async fn open_dedicated(&self) -> ChannelResult<()> {
        let signals = &self.inner.signals;
        let mut shared = self.inner.shared.subscribe()?;

        let (port, subscription) = loop {
            let packet = shared.recv().await.ok_or_else(transport_gone)?;
            if let Some(adopted) = adopt_port(packet, &signals.connect) {
                break adopted;
            }
        };
        drop(shared);
        debug!(origin = %self.origin(), "Adopted dedicated port");

        let outbound = self.attach(Arc::new(port), subscription, HandshakeHook::None);
        self.request(&outbound, &signals.connected, Value::Null, None, |_| {})?
            .await?;
        Ok(())
    }

    /// `connect()` in negotiated-port mode.
    pub(super) async fn connect_negotiated(&self) -> ChannelResult<()> {
        let signals = &self.inner.signals;
        let mut shared = self.inner.shared.subscribe()?;
        let mut announce = tokio::time::interval(self.inner.config.announce_interval);
        announce.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let (port, subscription) = loop {
            tokio::select! {
                _ = announce.tick() => {
                    self.inner
                        .shared
                        .post(Packet::new(json!(signals.connection_request)))?;
                }
                packet = shared.recv() => {
                    let packet = packet.ok_or_else(transport_gone)?;
                    if let Some(adopted) = adopt_port(packet, &signals.connect) {
                        break adopted;
                    }
                }
            }
        };
        drop(shared);
        debug!(origin = %self.origin(), "Adopted negotiated port");

        let outbound = self.attach(Arc::new(port), subscription, HandshakeHook::None);
        self.request(&outbound, &signals.connected, Value::Null, None, |_| {})?
            .await?;
        Ok(())
    }

    /// `open()` in negotiated-port mode.
    pub(super) async fn open_negotiated(&self) -> ChannelResult<()> {
        let signals = &self.inner.signals;
        let (acknowledged, on_ack) = oneshot::channel();
        let registration = self
            .inner
            .handlers
            .register_internal(&signals.connected, Handler::auto(acknowledge_once(acknowledged)))?;

        let result: ChannelResult<()> = async {
            let mut shared = self.inner.shared.subscribe()?;
            loop {
                let packet = shared.recv().await.ok_or_else(transport_gone)?;
                if packet.data.as_str() == Some(signals.connection_request.as_str()) {
                    break;
                }
            }
            // Later announcements must not open a second pipe.
            drop(shared);

            let (local, remote) = Port::pair(self.origin());
            let subscription = local.subscribe()?;
            self.attach(Arc::new(local), subscription, HandshakeHook::None);

            self.inner
                .shared
                .post(Packet::with_port(json!(signals.connect), remote))?;
            debug!(origin = %self.origin(), "Answered connection request with a port");

            on_ack.await.map_err(|_| ChannelError::Closed)
        }
        .await;

        registration.dispose();
        result
    }

    /// `connect()` in channel-id mode.
    pub(super) async fn connect_channel_id(&self) -> ChannelResult<()> {
        let waiter = Arc::new(IdentityWaiter::default());
        let shared = self.inner.shared.clone();
        let subscription = shared.subscribe()?;
        let outbound = self.attach(shared, subscription, HandshakeHook::Await(waiter.clone()));

        let timeout = self.inner.config.handshake_timeout;
        let reply = self
            .request(&outbound, CONNECT_EVENT, Value::Null, Some(timeout), |id| {
                waiter.expect(id)
            })?
            .await;

        match reply {
            Ok(_) if self.inner.identity.is_established() => {
                info!(
                    channel_id = self.inner.identity.channel_id().unwrap_or_default(),
                    "Channel id agreed"
                );
                Ok(())
            }
            Ok(payload) => Err(ChannelError::ConnectionFailed(format!(
                "connect reply carried no channel id: {payload}"
            ))),
            Err(ChannelError::Timeout { timeout, .. }) => Err(ChannelError::ConnectionFailed(
                format!("no reply to connect within {timeout:?}"),
            )),
            Err(ChannelError::Remote(err)) => Err(ChannelError::ConnectionFailed(err)),
            Err(err) => Err(err),
        }
    }

    /// `open()` in channel-id mode.
    pub(super) async fn open_channel_id(&self) -> ChannelResult<()> {
        let (assigned, on_assigned) = oneshot::channel();
        let acceptor = Arc::new(ConnectAcceptor::new(assigned));
        let shared = self.inner.shared.clone();
        let subscription = shared.subscribe()?;
        self.attach(shared, subscription, HandshakeHook::Accept(acceptor));

        let channel_id = on_assigned.await.map_err(|_| ChannelError::Closed)?;
        info!(channel_id = %channel_id, "Channel id assigned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_transport::WindowTransport;

    #[test]
    fn test_acceptor_assigns_once() {
        let (local, remote) = WindowTransport::pair("https://frame", "https://host");
        let mut peer = remote.subscribe().unwrap();
        let identity = ChannelIdentity::new();
        let stats = ChannelStats::default();
        let outbound = Outbound::new(Arc::new(local), "https://frame", None);
        let (assigned, mut on_assigned) = oneshot::channel();
        let acceptor = ConnectAcceptor::new(assigned);

        let first = Message::request(CONNECT_EVENT, CorrelationId::new(), "https://host", Value::Null);
        acceptor.accept(&first, &outbound, &identity, &stats);

        let reply = Message::decode(&peer.try_recv().unwrap().unwrap().data).unwrap();
        let channel_id = identity.channel_id().unwrap().to_string();
        assert_eq!(reply.uuid, first.uuid);
        assert_eq!(reply.payload, json!(channel_id));
        assert!(reply.channel_id.is_none());
        assert_eq!(on_assigned.try_recv().unwrap(), channel_id);

        let second = Message::request(CONNECT_EVENT, CorrelationId::new(), "https://host", Value::Null);
        acceptor.accept(&second, &outbound, &identity, &stats);

        assert!(peer.try_recv().unwrap().is_none());
        assert_eq!(identity.channel_id(), Some(channel_id.as_str()));
        assert_eq!(stats.snapshot().handshakes_rejected, 1);
    }

    #[test]
    fn test_waiter_adopts_matching_reply_only() {
        let identity = ChannelIdentity::new();
        let waiter = IdentityWaiter::default();
        let request = CorrelationId::new();
        waiter.expect(request);

        let other = Message::response(CorrelationId::new(), "https://frame", json!("wrong"));
        waiter.observe(&other, &identity);
        assert!(!identity.is_established());

        let reply = Message::response(request, "https://frame", json!("chan-7"));
        waiter.observe(&reply, &identity);
        assert_eq!(identity.channel_id(), Some("chan-7"));
    }

    #[test]
    fn test_adopt_port_ignores_other_signals() {
        let (port, _other) = Port::pair("https://host");
        assert!(adopt_port(Packet::with_port(json!("x:connect"), port.clone()), "y:connect").is_none());
        assert!(adopt_port(Packet::new(json!("y:connect")), "y:connect").is_none());

        let adopted = adopt_port(Packet::with_port(json!("y:connect"), port.clone()), "y:connect");
        assert!(adopted.is_some());

        // A second listener seeing the same packet cannot start the port again.
        assert!(adopt_port(Packet::with_port(json!("y:connect"), port), "y:connect").is_none());
    }
}
