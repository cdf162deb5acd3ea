//! Handler kinds and their invocation.

use crate::dispatch::responder::Responder;
use crate::domain::{ChannelStats, Message};
use crate::outbound::Outbound;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Failure of an event handler, shipped to the requester as `error`.
///
/// Any `std::error::Error` converts into it, so handlers can use `?`.
pub struct HandlerError(String);

impl HandlerError {
    /// An error with a plain message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self(message.to_string())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl<E: std::error::Error> From<E> for HandlerError {
    fn from(err: E) -> Self {
        Self(err.to_string())
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerError({:?})", self.0)
    }
}

/// What an automatic handler returns.
pub type HandlerResult<T = Value> = Result<T, HandlerError>;

/// An event handler as a type, for handlers that carry their own state.
///
/// Closures registered with `on` cover the simple cases.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event. `Ok` becomes the response payload, `Err` its error.
    async fn handle(&self, payload: Value, origin: String) -> HandlerResult;
}

type AutoFn = dyn Fn(Value, String) -> BoxFuture<'static, HandlerResult> + Send + Sync;
type ManualFn = dyn Fn(Value, String, Responder) + Send + Sync;

/// A registered callback.
#[derive(Clone)]
pub(crate) enum Handler {
    /// Its return value (or failure) becomes the response.
    Auto(Arc<AutoFn>),
    /// Answers through a [`Responder`] whenever it wants, or never.
    Manual(Arc<ManualFn>),
}

impl Handler {
    pub(crate) fn auto<F, Fut>(callback: F) -> Self
    where
        F: Fn(Value, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Handler::Auto(Arc::new(move |payload, origin| {
            callback(payload, origin).boxed()
        }))
    }

    pub(crate) fn service(service: Arc<dyn EventHandler>) -> Self {
        Handler::Auto(Arc::new(move |payload, origin| {
            let service = service.clone();
            async move { service.handle(payload, origin).await }.boxed()
        }))
    }

    pub(crate) fn manual<F>(callback: F) -> Self
    where
        F: Fn(Value, String, Responder) + Send + Sync + 'static,
    {
        Handler::Manual(Arc::new(callback))
    }
}

/// Run `handler` for an inbound event without blocking the listener.
///
/// A failing or panicking automatic handler produces an `error` response;
/// nothing escapes into the listener loop.
pub(crate) fn spawn_invocation(
    handler: Handler,
    message: Message,
    outbound: Outbound,
    stats: Arc<ChannelStats>,
) {
    let Message {
        kind,
        uuid,
        origin,
        payload,
        no_response,
        ..
    } = message;

    match handler {
        Handler::Auto(callback) => {
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(async move { callback(payload, origin).await })
                    .catch_unwind()
                    .await;
                let result = outcome.unwrap_or_else(|panic| Err(HandlerError(panic_message(&*panic))));

                if let Err(err) = &result {
                    ChannelStats::bump(&stats.handler_failures);
                    warn!(correlation_id = %uuid, event = %kind, error = %err, "Handler failed");
                }

                if no_response {
                    debug!(correlation_id = %uuid, event = %kind, "Fire-and-forget event handled");
                    return;
                }

                let reply = match result {
                    Ok(payload) => Message::response(uuid.clone(), outbound.origin(), payload),
                    Err(err) => Message::failure(uuid.clone(), outbound.origin(), err.0),
                };

                if let Err(err) = outbound.send(reply) {
                    warn!(correlation_id = %uuid, event = %kind, error = %err, "Failed to send response");
                }
            });
        }
        Handler::Manual(callback) => {
            let responder = Responder::new(uuid.clone(), kind.clone(), outbound, no_response);
            let run = std::panic::catch_unwind(AssertUnwindSafe(|| {
                callback(payload, origin, responder)
            }));

            if let Err(panic) = run {
                ChannelStats::bump(&stats.handler_failures);
                warn!(
                    correlation_id = %uuid,
                    event = %kind,
                    error = %panic_message(&*panic),
                    "Manual handler panicked"
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std_errors_convert() {
        let err: HandlerError = serde_json::from_str::<u8>("\"x\"").unwrap_err().into();
        assert!(err.message().contains("invalid type"));
    }

    #[test]
    fn test_msg() {
        let err = HandlerError::msg("bad input");
        assert_eq!(err.to_string(), "bad input");
    }

    #[test]
    fn test_panic_message() {
        let panic = std::panic::catch_unwind(|| panic!("kaboom")).unwrap_err();
        assert_eq!(panic_message(&*panic), "kaboom");

        let n = 3;
        let panic = std::panic::catch_unwind(|| panic!("kaboom {n}")).unwrap_err();
        assert_eq!(panic_message(&*panic), "kaboom 3");
    }
}
