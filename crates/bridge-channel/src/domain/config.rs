//! Channel configuration with validation.

use crate::domain::message::{HandshakeSignals, DEFAULT_NAMESPACE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// How two endpoints agree on a private conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeMode {
    /// `connect()` opens a pipe and hands one end over with `<ns>:connect`.
    #[default]
    DedicatedPort,
    /// `connect()` announces readiness, `open()` opens and hands over the
    /// pipe, `connect()` acknowledges over it.
    NegotiatedPort,
    /// No pipe; both sides stay on the shared transport and stamp messages
    /// with an agreed channel id.
    ChannelId,
}

/// What to do with a response nobody is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedResponsePolicy {
    /// Count it, say nothing.
    Ignore,
    /// Count it and log a warning.
    #[default]
    Warn,
    /// Count it and log an error.
    Error,
}

/// Channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Handshake topology.
    pub mode: HandshakeMode,

    /// Prefix of the port handshake sentinels.
    pub namespace: String,

    /// How long `connect()` waits for the channel-id reply.
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,

    /// Pause between readiness announcements in negotiated mode.
    #[serde(with = "humantime_serde")]
    pub announce_interval: Duration,

    /// Timeout applied when `trigger` is called without one.
    /// `None` waits forever.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Option<Duration>,

    /// Handling of responses for unknown or expired requests.
    pub unmatched_responses: UnmatchedResponsePolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            mode: HandshakeMode::default(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            handshake_timeout: Duration::from_secs(5),
            announce_interval: Duration::from_millis(250),
            default_timeout: None,
            unmatched_responses: UnmatchedResponsePolicy::default(),
        }
    }
}

impl ChannelConfig {
    /// Default configuration with another handshake mode.
    pub fn with_mode(mode: HandshakeMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::InvalidNamespace(
                "namespace cannot be empty".into(),
            ));
        }

        if self.namespace.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidNamespace(
                "namespace cannot contain whitespace".into(),
            ));
        }

        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "handshake_timeout cannot be 0".into(),
            ));
        }

        if self.announce_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "announce_interval cannot be 0".into(),
            ));
        }

        if self.default_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidTimeout(
                "default_timeout cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Handshake sentinels for this namespace.
    pub fn signals(&self) -> HandshakeSignals {
        HandshakeSignals::new(&self.namespace)
    }
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
}
