//! Channel identity guard.
//!
//! Lets several logical channels share one broadcast transport. The id is
//! agreed once during the channel-id handshake and never changes after.

use crate::domain::error::IdentityError;
use std::sync::OnceLock;

/// The agreed id of one logical channel, if any.
#[derive(Debug, Default)]
pub struct ChannelIdentity {
    id: OnceLock<String>,
}

impl ChannelIdentity {
    /// A guard with no established id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the agreed id. Fails if one is already set.
    pub fn establish(&self, id: impl Into<String>) -> Result<(), IdentityError> {
        self.id
            .set(id.into())
            .map_err(|_| IdentityError::AlreadyEstablished {
                current: self.id.get().cloned().unwrap_or_default(),
            })
    }

    /// The established id.
    pub fn channel_id(&self) -> Option<&str> {
        self.id.get().map(String::as_str)
    }

    pub fn is_established(&self) -> bool {
        self.id.get().is_some()
    }

    /// Whether a message tagged with `id` belongs to this channel.
    ///
    /// Untagged messages match everything. A tagged message matches only an
    /// equal established id, so nothing tagged is accepted before the
    /// handshake.
    pub fn matches_channel(&self, id: Option<&str>) -> bool {
        match id {
            None => true,
            Some(id) => self.channel_id() == Some(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_always_matches() {
        let identity = ChannelIdentity::new();
        assert!(identity.matches_channel(None));
        identity.establish("x").unwrap();
        assert!(identity.matches_channel(None));
    }

    #[test]
    fn test_tagged_never_matches_before_handshake() {
        let identity = ChannelIdentity::new();
        assert!(!identity.matches_channel(Some("x")));
        assert!(!identity.matches_channel(Some("")));
    }

    #[test]
    fn test_tagged_matches_only_established_id() {
        let identity = ChannelIdentity::new();
        identity.establish("x").unwrap();
        assert!(identity.matches_channel(Some("x")));
        assert!(!identity.matches_channel(Some("y")));
    }

    #[test]
    fn test_established_once() {
        let identity = ChannelIdentity::new();
        identity.establish("x").unwrap();

        let err = identity.establish("y").unwrap_err();
        assert_eq!(
            err,
            IdentityError::AlreadyEstablished {
                current: "x".into()
            }
        );
        assert_eq!(identity.channel_id(), Some("x"));
    }
}
