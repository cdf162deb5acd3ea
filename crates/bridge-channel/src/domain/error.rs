//! Channel error types.
//!
//! Local failures (missing target, using a channel before its handshake,
//! reserved or duplicate event names) are returned synchronously and are
//! never worth retrying. Remote failures and timeouts reach the caller
//! through the [`PendingResponse`](crate::PendingResponse) future.

use crate::domain::config::ConfigError;
use bridge_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors from channel operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// No target was given at construction.
    #[error("a valid target is required to create a channel")]
    MissingTarget,

    /// The channel was used before `open()` or `connect()` completed.
    #[error("channel is not connected: open or connect it before triggering events")]
    NotConnected,

    /// `open()` or `connect()` was called on a channel that already has a role.
    #[error("channel is already opened or connected")]
    AlreadyConnected,

    /// Reserved or duplicate event name.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The remote handler failed; carries its stringified error.
    #[error("remote handler failed: {0}")]
    Remote(String),

    /// No matching response arrived in time.
    #[error("no response to \"{event}\" within {timeout:?}")]
    Timeout { event: String, timeout: Duration },

    /// The handshake did not complete.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The channel was disposed while the operation was in flight.
    #[error("channel closed")]
    Closed,

    /// The underlying transport refused the operation.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A payload could not be converted to or from JSON.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The channel configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Why an event name was refused.
///
/// Registration is a tagged outcome rather than a panic so callers can branch
/// on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The name is used by the protocol itself.
    #[error("the \"{0}\" event type is reserved for internal use")]
    ReservedName(String),

    /// A handler for this name already exists on the channel.
    #[error("event handler for event \"{0}\" already exists")]
    AlreadyRegistered(String),
}

/// Identity guard errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The channel id was already agreed and cannot change.
    #[error("channel id already established as {current}")]
    AlreadyEstablished { current: String },
}
