//! # Transport Port
//!
//! The interface every wire endpoint implements, shared windows and
//! dedicated ports alike.

use crate::port::Port;
use crate::subscription::Subscription;
use serde_json::Value;
use thiserror::Error;

/// Errors from transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The other end of the pipe is gone.
    #[error("transport closed")]
    Closed,

    /// The endpoint was already started by another listener.
    #[error("port already started")]
    AlreadyStarted,

    /// This endpoint cannot hand off dedicated ports.
    #[error("port transfer not supported on this transport")]
    TransferNotSupported,
}

/// One posted message.
///
/// `ports` carries dedicated pipe ends handed to the receiver. They are a
/// capability transfer and never part of the serialized data.
#[derive(Debug, Clone)]
pub struct Packet {
    /// The message body.
    pub data: Value,
    /// Transferred pipe ends.
    pub ports: Vec<Port>,
}

impl Packet {
    /// A packet without transferred ports.
    #[must_use]
    pub fn new(data: Value) -> Self {
        Self {
            data,
            ports: Vec::new(),
        }
    }

    /// A packet transferring one pipe end.
    #[must_use]
    pub fn with_port(data: Value, port: Port) -> Self {
        Self {
            data,
            ports: vec![port],
        }
    }
}

/// A wire endpoint: somewhere to post packets and something to listen on.
pub trait Transport: Send + Sync {
    /// Origin of the local context, stamped on outgoing messages.
    fn origin(&self) -> &str;

    /// Post a packet to the remote side.
    ///
    /// Delivery is best effort. A packet nobody listens for is dropped.
    fn post(&self, packet: Packet) -> Result<(), TransportError>;

    /// Start listening for packets posted to the local side.
    fn subscribe(&self) -> Result<Subscription, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_packet_new_has_no_ports() {
        let packet = Packet::new(json!("hello"));
        assert!(packet.ports.is_empty());
        assert_eq!(packet.data, json!("hello"));
    }

    #[test]
    fn test_packet_with_port() {
        let (a, _b) = Port::pair("https://host");
        let packet = Packet::with_port(json!("open"), a);
        assert_eq!(packet.ports.len(), 1);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(TransportError::Closed.to_string(), "transport closed");
        assert_eq!(
            TransportError::AlreadyStarted.to_string(),
            "port already started"
        );
    }
}
