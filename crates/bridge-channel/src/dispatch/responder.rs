//! Manual reply handle for handlers that answer on their own schedule.

use crate::domain::{ChannelResult, Message};
use crate::outbound::Outbound;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Answers one inbound request.
///
/// Consumed by [`respond`](Self::respond) or [`reject`](Self::reject), so a
/// request is answered at most once. For fire-and-forget events both are
/// no-ops.
pub struct Responder {
    /// The request's id exactly as the peer sent it.
    uuid: String,
    event: String,
    outbound: Outbound,
    silent: bool,
    answered: bool,
}

impl Responder {
    pub(crate) fn new(
        uuid: impl Into<String>,
        event: String,
        outbound: Outbound,
        silent: bool,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            event,
            outbound,
            silent,
            answered: false,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.uuid
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// False for fire-and-forget events.
    pub fn expects_response(&self) -> bool {
        !self.silent
    }

    /// Send a successful response.
    ///
    /// If `payload` cannot be serialized the requester receives the
    /// serialization error instead, and it is returned here too.
    pub fn respond<T: Serialize>(mut self, payload: T) -> ChannelResult<()> {
        self.answered = true;
        if self.silent {
            return Ok(());
        }

        match serde_json::to_value(payload) {
            Ok(payload) => self
                .outbound
                .send(Message::response(self.uuid.clone(), self.outbound.origin(), payload)),
            Err(err) => {
                self.outbound.send(Message::failure(
                    self.uuid.clone(),
                    self.outbound.origin(),
                    err.to_string(),
                ))?;
                Err(err.into())
            }
        }
    }

    /// Send a failed response carrying `error`.
    pub fn reject(mut self, error: impl fmt::Display) -> ChannelResult<()> {
        self.answered = true;
        if self.silent {
            return Ok(());
        }

        self.outbound.send(Message::failure(
            self.uuid.clone(),
            self.outbound.origin(),
            error.to_string(),
        ))
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.answered || self.silent {
            return;
        }

        if std::thread::panicking() {
            // The handler blew up while holding us: answer for it.
            let failure = Message::failure(self.uuid.clone(), self.outbound.origin(), "handler panicked");
            if let Err(err) = self.outbound.send(failure) {
                warn!(correlation_id = %self.uuid, error = %err, "Failed to send response");
            }
        } else {
            debug!(
                correlation_id = %self.uuid,
                event = %self.event,
                "Responder dropped without answering"
            );
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("uuid", &self.uuid)
            .field("event", &self.event)
            .field("silent", &self.silent)
            .field("answered", &self.answered)
            .finish()
    }
}
