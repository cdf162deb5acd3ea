//! Outbound side of a channel: envelope stamping and posting.

use crate::domain::{ChannelIdentity, ChannelResult, Message};
use bridge_transport::{Packet, Transport};
use std::sync::Arc;

/// The wire endpoint a channel sends through, plus what it stamps on every
/// message.
#[derive(Clone)]
pub(crate) struct Outbound {
    target: Arc<dyn Transport>,
    origin: String,
    identity: Option<Arc<ChannelIdentity>>,
}

impl Outbound {
    pub(crate) fn new(
        target: Arc<dyn Transport>,
        origin: impl Into<String>,
        identity: Option<Arc<ChannelIdentity>>,
    ) -> Self {
        Self {
            target,
            origin: origin.into(),
            identity,
        }
    }

    pub(crate) fn origin(&self) -> &str {
        &self.origin
    }

    /// Post a message tagged with the established channel id, if any.
    pub(crate) fn send(&self, mut message: Message) -> ChannelResult<()> {
        if let Some(identity) = &self.identity {
            message.channel_id = identity.channel_id().map(str::to_owned);
        }
        self.send_unstamped(message)
    }

    /// Post a message as is.
    pub(crate) fn send_unstamped(&self, message: Message) -> ChannelResult<()> {
        let data = message.encode()?;
        self.target.post(Packet::new(data))?;
        Ok(())
    }
}
