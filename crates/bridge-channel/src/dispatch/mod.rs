//! Dispatch table: event name to handler.
//!
//! At most one handler per name. Reserved names are refused at registration
//! so a user handler can never shadow the protocol's own traffic.

mod handler;
mod responder;

pub(crate) use handler::{spawn_invocation, Handler};
pub use handler::{EventHandler, HandlerError, HandlerResult};
pub use responder::Responder;

use crate::domain::{RegistrationError, RESPONSE_EVENT};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

struct HandlerEntry {
    /// Distinguishes successive registrations of the same name
    token: u64,
    handler: Handler,
}

/// Registered handlers of one channel.
pub struct HandlerTable {
    handlers: DashMap<String, HandlerEntry>,
    reserved: Vec<String>,
    next_token: AtomicU64,
}

impl HandlerTable {
    /// A table refusing `"response"` plus `reserved`.
    pub fn new(reserved: impl IntoIterator<Item = String>) -> Self {
        let mut names = vec![RESPONSE_EVENT.to_string()];
        names.extend(reserved);
        Self {
            handlers: DashMap::new(),
            reserved: names,
            next_token: AtomicU64::new(0),
        }
    }

    /// Refuse names the protocol uses itself.
    pub fn check_name(&self, event: &str) -> Result<(), RegistrationError> {
        if self.reserved.iter().any(|name| name == event) {
            return Err(RegistrationError::ReservedName(event.to_string()));
        }
        Ok(())
    }

    pub(crate) fn register(
        self: &Arc<Self>,
        event: &str,
        handler: Handler,
    ) -> Result<Registration, RegistrationError> {
        self.check_name(event)?;
        self.insert(event, handler)
    }

    /// Register a protocol handler under a reserved name.
    pub(crate) fn register_internal(
        self: &Arc<Self>,
        event: &str,
        handler: Handler,
    ) -> Result<Registration, RegistrationError> {
        self.insert(event, handler)
    }

    fn insert(self: &Arc<Self>, event: &str, handler: Handler) -> Result<Registration, RegistrationError> {
        match self.handlers.entry(event.to_string()) {
            Entry::Occupied(_) => Err(RegistrationError::AlreadyRegistered(event.to_string())),
            Entry::Vacant(slot) => {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                slot.insert(HandlerEntry { token, handler });
                debug!(event = event, "Registered event handler");

                Ok(Registration {
                    table: Arc::downgrade(self),
                    event: event.to_string(),
                    token,
                    disposed: AtomicBool::new(false),
                })
            }
        }
    }

    pub(crate) fn lookup(&self, event: &str) -> Option<Handler> {
        self.handlers.get(event).map(|entry| entry.handler.clone())
    }

    pub fn contains(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Drop every handler.
    pub fn clear(&self) {
        self.handlers.clear();
    }

    fn remove(&self, event: &str, token: u64) -> bool {
        self.handlers
            .remove_if(event, |_, entry| entry.token == token)
            .is_some()
    }
}

/// Handle returned by `on`; disposing it unregisters the handler.
///
/// Dropping the handle keeps the handler registered.
#[derive(Debug)]
pub struct Registration {
    table: Weak<HandlerTable>,
    event: String,
    token: u64,
    disposed: AtomicBool,
}

impl Registration {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Unregister the handler. Idempotent.
    ///
    /// Only removes the handler this handle registered: after a dispose and a
    /// fresh `on` for the same name, the stale handle does nothing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(table) = self.table.upgrade() {
            if table.remove(&self.event, self.token) {
                debug!(event = %self.event, "Unregistered event handler");
            }
        }
    }
}
