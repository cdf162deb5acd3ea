//! # Channel
//!
//! A bidirectional request/response and event channel between two
//! endpoints. One side calls [`Channel::open`], the other
//! [`Channel::connect`]; afterwards both can [`trigger`](Channel::trigger)
//! events and register handlers with [`on`](Channel::on).
//!
//! ```text
//!   trigger("ping", 41) ──▶ pending store ──▶ outbound ──▶ transport
//!                                ▲                             │
//!   PendingResponse ◀── complete │                             ▼
//!                          listener ◀── transport ◀── peer handler ("ping")
//! ```
//!
//! A `Channel` is a cheap handle; clones share the same endpoint.

mod handshake;
mod listener;

use crate::dispatch::{
    EventHandler, Handler, HandlerResult, HandlerTable, Registration, Responder,
};
use crate::domain::{
    ChannelConfig, ChannelError, ChannelIdentity, ChannelResult, ChannelStats, CorrelationId,
    HandshakeMode, HandshakeSignals, Message, PendingRequestStore, PendingResponse,
    StatsSnapshot, CONNECT_EVENT,
};
use crate::outbound::Outbound;
use bridge_transport::{Subscription, Transport};
use listener::{HandshakeHook, Router};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Neither `open()` nor `connect()` has been called.
    Idle,
    /// `open()` is waiting for its peer.
    Opening,
    /// `connect()` is waiting for its peer.
    Connecting,
    /// Opened and ready.
    Open,
    /// Connected and ready.
    Connected,
    /// Disposed; every operation fails with [`ChannelError::Closed`].
    Disposed,
}

impl LinkState {
    pub fn is_ready(self) -> bool {
        matches!(self, LinkState::Open | LinkState::Connected)
    }
}

/// Request/response and event channel over a [`Transport`].
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    config: ChannelConfig,
    signals: HandshakeSignals,
    /// Transport given at construction: the handshake medium, and the
    /// conversation medium in channel-id mode.
    shared: Arc<dyn Transport>,
    origin: String,
    state: Mutex<LinkState>,
    /// Where requests and responses go once a handshake picked a medium.
    outbound: RwLock<Option<Outbound>>,
    identity: Arc<ChannelIdentity>,
    pending: Arc<PendingRequestStore>,
    handlers: Arc<HandlerTable>,
    stats: Arc<ChannelStats>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    /// Flips to true on dispose; wakes handshakes still in progress.
    closed: watch::Sender<bool>,
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        for listener in self.listeners.get_mut().drain(..) {
            listener.abort();
        }
        self.pending.fail_all();
    }
}

impl Channel {
    /// Create a channel over `target` with the default configuration.
    ///
    /// Fails with [`ChannelError::MissingTarget`] when `target` is `None`.
    pub fn new(target: Option<Arc<dyn Transport>>) -> ChannelResult<Self> {
        Self::with_config(target, ChannelConfig::default())
    }

    pub fn with_config(
        target: Option<Arc<dyn Transport>>,
        config: ChannelConfig,
    ) -> ChannelResult<Self> {
        let shared = target.ok_or(ChannelError::MissingTarget)?;
        config.validate()?;

        let signals = config.signals();
        let reserved = match config.mode {
            HandshakeMode::ChannelId => CONNECT_EVENT.to_string(),
            HandshakeMode::DedicatedPort | HandshakeMode::NegotiatedPort => {
                signals.connected.clone()
            }
        };

        let stats = Arc::new(ChannelStats::default());
        let pending = Arc::new(PendingRequestStore::new(
            config.unmatched_responses,
            stats.clone(),
        ));
        let origin = shared.origin().to_string();

        debug!(origin = %origin, mode = ?config.mode, "Created channel");

        Ok(Self {
            inner: Arc::new(ChannelInner {
                signals,
                shared,
                origin,
                state: Mutex::new(LinkState::Idle),
                outbound: RwLock::new(None),
                identity: Arc::new(ChannelIdentity::new()),
                pending,
                handlers: Arc::new(HandlerTable::new([reserved])),
                stats,
                listeners: Mutex::new(Vec::new()),
                closed: watch::channel(false).0,
                config,
            }),
        })
    }

    /// Origin of the local endpoint.
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.lock()
    }

    /// Whether the handshake completed and the channel is not disposed.
    pub fn is_connected(&self) -> bool {
        self.state().is_ready()
    }

    /// The agreed channel id (channel-id mode only).
    pub fn channel_id(&self) -> Option<String> {
        self.inner.identity.channel_id().map(str::to_owned)
    }

    /// Whether a message tagged with `channel_id` belongs to this channel.
    pub fn matches_channel(&self, channel_id: Option<&str>) -> bool {
        self.inner.identity.matches_channel(channel_id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.pending_count()
    }

    /// Wait for a peer calling [`connect`](Self::connect) and become the
    /// accepting side.
    pub async fn open(&self) -> ChannelResult<()> {
        self.begin(LinkState::Opening)?;
        let result = match self.inner.config.mode {
            HandshakeMode::DedicatedPort => self.until_closed(self.open_dedicated()).await,
            HandshakeMode::NegotiatedPort => self.until_closed(self.open_negotiated()).await,
            HandshakeMode::ChannelId => self.until_closed(self.open_channel_id()).await,
        };
        self.settle(result, LinkState::Open)
    }

    /// Reach a peer calling [`open`](Self::open) and become the initiating
    /// side.
    pub async fn connect(&self) -> ChannelResult<()> {
        self.begin(LinkState::Connecting)?;
        let result = match self.inner.config.mode {
            HandshakeMode::DedicatedPort => self.until_closed(self.connect_dedicated()).await,
            HandshakeMode::NegotiatedPort => self.until_closed(self.connect_negotiated()).await,
            HandshakeMode::ChannelId => self.until_closed(self.connect_channel_id()).await,
        };
        self.settle(result, LinkState::Connected)
    }

    /// Send `event` and get a future for the peer's response.
    ///
    /// Local failures are returned right away. The response future fails with
    /// [`ChannelError::Remote`] when the peer's handler fails, and with
    /// [`ChannelError::Timeout`] when `timeout` (or the configured default)
    /// elapses first. Without any timeout it waits indefinitely.
    pub fn trigger<T: Serialize>(
        &self,
        event: &str,
        payload: T,
        timeout: Option<Duration>,
    ) -> ChannelResult<PendingResponse> {
        self.inner.handlers.check_name(event)?;
        let outbound = self.outbound()?;
        let payload = serde_json::to_value(payload)?;
        let timeout = timeout.or(self.inner.config.default_timeout);

        self.request(&outbound, event, payload, timeout, |_| {})
    }

    /// [`trigger`](Self::trigger) and deserialize the response.
    pub async fn trigger_as<R, T>(
        &self,
        event: &str,
        payload: T,
        timeout: Option<Duration>,
    ) -> ChannelResult<R>
    where
        R: DeserializeOwned,
        T: Serialize,
    {
        let value = self.trigger(event, payload, timeout)?.await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send `event` without waiting for, or asking for, a response.
    pub fn simple_trigger<T: Serialize>(&self, event: &str, payload: T) -> ChannelResult<CorrelationId> {
        self.inner.handlers.check_name(event)?;
        let outbound = self.outbound()?;
        let payload = serde_json::to_value(payload)?;

        let uuid = CorrelationId::new();
        outbound.send(Message::request(event, uuid, outbound.origin(), payload).fire_and_forget())?;
        debug!(correlation_id = %uuid, event = event, "Sent fire-and-forget event");
        Ok(uuid)
    }

    /// Register the handler for `event`. Its result becomes the response.
    ///
    /// Fails if the name is reserved or already has a handler. Handlers may
    /// be registered before the handshake.
    pub fn on<F, Fut>(&self, event: &str, handler: F) -> ChannelResult<Registration>
    where
        F: Fn(Value, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(event, Handler::auto(handler))
    }

    /// [`on`](Self::on) with typed payload and result.
    ///
    /// A payload that does not deserialize into `T` fails the request.
    pub fn on_typed<T, R, F, Fut>(&self, event: &str, handler: F) -> ChannelResult<Registration>
    where
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(T, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.on(event, move |payload, origin| {
            let handler = handler.clone();
            async move {
                let payload: T = serde_json::from_value(payload)?;
                let result = handler(payload, origin).await?;
                Ok(serde_json::to_value(result)?)
            }
        })
    }

    /// Register an [`EventHandler`] implementation for `event`.
    pub fn on_handler(
        &self,
        event: &str,
        handler: Arc<dyn EventHandler>,
    ) -> ChannelResult<Registration> {
        self.register(event, Handler::service(handler))
    }

    /// Register a handler that answers through a [`Responder`], possibly
    /// later or not at all.
    pub fn on_manual<F>(&self, event: &str, handler: F) -> ChannelResult<Registration>
    where
        F: Fn(Value, String, Responder) + Send + Sync + 'static,
    {
        self.register(event, Handler::manual(handler))
    }

    /// Tear the channel down. Idempotent.
    ///
    /// Stops the listeners, fails every pending request with
    /// [`ChannelError::Closed`] and drops all handlers.
    pub fn dispose(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == LinkState::Disposed {
                return;
            }
            *state = LinkState::Disposed;
        }

        self.inner.closed.send_replace(true);
        self.stop_listeners();
        let failed = self.inner.pending.fail_all();
        self.inner.handlers.clear();

        info!(origin = %self.origin(), failed_requests = failed, "Channel disposed");
    }

    fn register(&self, event: &str, handler: Handler) -> ChannelResult<Registration> {
        if self.state() == LinkState::Disposed {
            return Err(ChannelError::Closed);
        }
        Ok(self.inner.handlers.register(event, handler)?)
    }

    fn outbound(&self) -> ChannelResult<Outbound> {
        match self.state() {
            LinkState::Disposed => Err(ChannelError::Closed),
            state if state.is_ready() => self
                .inner
                .outbound
                .read()
                .clone()
                .ok_or(ChannelError::NotConnected),
            _ => Err(ChannelError::NotConnected),
        }
    }

    /// Register a waiter, then post the request.
    ///
    /// `before_send` sees the correlation id before anything hits the wire.
    fn request(
        &self,
        outbound: &Outbound,
        event: &str,
        payload: Value,
        timeout: Option<Duration>,
        before_send: impl FnOnce(CorrelationId),
    ) -> ChannelResult<PendingResponse> {
        let pending = &self.inner.pending;
        let (uuid, rx) = pending.register(event);
        before_send(uuid);

        // Dropping the response on a failed send withdraws the waiter.
        let response = PendingResponse::new(uuid, event, rx, timeout, pending.clone());
        outbound.send(Message::request(event, uuid, outbound.origin(), payload))?;
        Ok(response)
    }

    /// Route everything arriving on `subscription` and make `target` the
    /// outbound medium.
    fn attach(
        &self,
        target: Arc<dyn Transport>,
        subscription: Subscription,
        hook: HandshakeHook,
    ) -> Outbound {
        let outbound = Outbound::new(target, self.origin(), Some(self.inner.identity.clone()));
        *self.inner.outbound.write() = Some(outbound.clone());

        let router = Router {
            pending: self.inner.pending.clone(),
            handlers: self.inner.handlers.clone(),
            identity: self.inner.identity.clone(),
            stats: self.inner.stats.clone(),
            outbound: outbound.clone(),
            hook,
        };
        let listener = tokio::spawn(router.run(subscription));
        let mut listeners = self.inner.listeners.lock();
        if self.state() == LinkState::Disposed {
            listener.abort();
        } else {
            listeners.push(listener);
        }

        outbound
    }

    /// Run a handshake, giving up with [`ChannelError::Closed`] on dispose.
    async fn until_closed(
        &self,
        handshake: impl Future<Output = ChannelResult<()>>,
    ) -> ChannelResult<()> {
        let mut closed = self.inner.closed.subscribe();
        tokio::select! {
            result = handshake => result,
            _ = closed.wait_for(|closed| *closed) => Err(ChannelError::Closed),
        }
    }

    fn begin(&self, handshake: LinkState) -> ChannelResult<()> {
        let mut state = self.inner.state.lock();
        match *state {
            LinkState::Idle => {
                *state = handshake;
                Ok(())
            }
            LinkState::Disposed => Err(ChannelError::Closed),
            _ => Err(ChannelError::AlreadyConnected),
        }
    }

    fn settle(&self, result: ChannelResult<()>, established: LinkState) -> ChannelResult<()> {
        let mut state = self.inner.state.lock();
        if *state == LinkState::Disposed {
            return Err(ChannelError::Closed);
        }

        match result {
            Ok(()) => {
                *state = established;
                info!(origin = %self.origin(), state = ?established, "Channel ready");
                Ok(())
            }
            Err(err) => {
                *state = LinkState::Idle;
                drop(state);
                self.stop_listeners();
                debug!(origin = %self.origin(), error = %err, "Handshake failed");
                Err(err)
            }
        }
    }

    fn stop_listeners(&self) {
        for listener in self.inner.listeners.lock().drain(..) {
            listener.abort();
        }
        *self.inner.outbound.write() = None;
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("origin", &self.inner.origin)
            .field("mode", &self.inner.config.mode)
            .field("state", &self.state())
            .field("channel_id", &self.inner.identity.channel_id())
            .finish()
    }
}
