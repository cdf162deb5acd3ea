//! # Lightweight API
//!
//! One-off exchanges straight over a shared transport: no handshake, no
//! channel id, no persistent state beyond a single listener. Correlation is
//! by uuid exactly as on a [`Channel`](crate::Channel), and `"response"` is
//! still reserved.
//!
//! ```rust,ignore
//! let answer = lite::trigger(&*transport, "ping", 41, Some(Duration::from_secs(1))).await?;
//! ```

use crate::dispatch::{spawn_invocation, Handler, HandlerResult};
use crate::domain::{
    ChannelError, ChannelResult, ChannelStats, CorrelationId, Message, StatsSnapshot,
    RESPONSE_EVENT,
};
use crate::outbound::Outbound;
use bridge_transport::Transport;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

fn check_name(event: &str) -> ChannelResult<()> {
    if event == RESPONSE_EVENT {
        return Err(crate::domain::RegistrationError::ReservedName(event.to_string()).into());
    }
    Ok(())
}

/// Send `event` and wait for the matching response.
///
/// Without a timeout this waits until the transport closes.
pub async fn trigger<T: Serialize>(
    transport: &dyn Transport,
    event: &str,
    payload: T,
    timeout: Option<Duration>,
) -> ChannelResult<Value> {
    check_name(event)?;
    let payload = serde_json::to_value(payload)?;
    let uuid = CorrelationId::new();

    // Subscribe first so a fast reply cannot slip past.
    let mut subscription = transport.subscribe()?;
    let request = Message::request(event, uuid, transport.origin(), payload);
    transport.post(bridge_transport::Packet::new(request.encode()?))?;
    debug!(correlation_id = %uuid, event = event, "Sent lightweight request");

    let wait = async {
        while let Some(packet) = subscription.recv().await {
            let Some(message) = Message::decode(&packet.data) else {
                continue;
            };
            if !message.is_response() || message.uuid != uuid {
                continue;
            }
            return match message.error {
                Some(err) => Err(ChannelError::Remote(err)),
                None => Ok(message.payload),
            };
        }
        Err(ChannelError::Closed)
    };

    match timeout {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .unwrap_or_else(|_| {
                Err(ChannelError::Timeout {
                    event: event.to_string(),
                    timeout: limit,
                })
            }),
        None => wait.await,
    }
}

/// Send `event` flagged so the peer does not answer.
pub fn simple_trigger<T: Serialize>(
    transport: &dyn Transport,
    event: &str,
    payload: T,
) -> ChannelResult<CorrelationId> {
    check_name(event)?;
    let payload = serde_json::to_value(payload)?;
    let uuid = CorrelationId::new();

    let message = Message::request(event, uuid, transport.origin(), payload).fire_and_forget();
    transport.post(bridge_transport::Packet::new(message.encode()?))?;
    Ok(uuid)
}

/// Answer every `event` arriving on `transport` with `handler`'s result,
/// until the returned [`Listener`] is disposed.
pub fn on<F, Fut>(transport: Arc<dyn Transport>, event: &str, handler: F) -> ChannelResult<Listener>
where
    F: Fn(Value, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    check_name(event)?;
    let mut subscription = transport.subscribe()?;
    let handler = Handler::auto(handler);
    let stats = Arc::new(ChannelStats::default());
    let outbound = Outbound::new(transport.clone(), transport.origin(), None);

    let event_name = event.to_string();
    let task_stats = stats.clone();
    let task = tokio::spawn(async move {
        while let Some(packet) = subscription.recv().await {
            let Some(message) = Message::decode(&packet.data) else {
                continue;
            };
            if message.kind != event_name {
                continue;
            }
            spawn_invocation(handler.clone(), message, outbound.clone(), task_stats.clone());
        }
        debug!(event = %event_name, "Transport closed, lightweight listener stopped");
    });

    Ok(Listener {
        event: event.to_string(),
        task,
        disposed: AtomicBool::new(false),
        stats,
    })
}

/// A running lightweight handler.
///
/// Dropping it without [`dispose`](Self::dispose) leaves the handler running
/// until the transport closes.
#[derive(Debug)]
pub struct Listener {
    event: String,
    task: JoinHandle<()>,
    disposed: AtomicBool,
    stats: Arc<ChannelStats>,
}

impl Listener {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Stop handling. Idempotent.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.task.abort();
            debug!(event = %self.event, "Lightweight listener disposed");
        }
    }

    pub fn is_active(&self) -> bool {
        !self.disposed.load(Ordering::Acquire) && !self.task.is_finished()
    }

    /// Handler failure counts.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
