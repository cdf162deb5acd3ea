//! # Subscriptions
//!
//! The listening side of a transport. Holding a [`Subscription`] is holding a
//! registered listener; dropping it unregisters.

use crate::transport::{Packet, TransportError};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

enum Source {
    Window(broadcast::Receiver<Packet>),
    Port(mpsc::UnboundedReceiver<Packet>),
}

/// A listener handle for receiving packets.
///
/// When dropped, the listener is released.
pub struct Subscription {
    source: Source,
}

impl Subscription {
    pub(crate) fn from_window(receiver: broadcast::Receiver<Packet>) -> Self {
        Self {
            source: Source::Window(receiver),
        }
    }

    pub(crate) fn from_port(receiver: mpsc::UnboundedReceiver<Packet>) -> Self {
        Self {
            source: Source::Port(receiver),
        }
    }

    /// Receive the next packet.
    ///
    /// # Returns
    ///
    /// - `Some(packet)` - The next packet
    /// - `None` - The transport was closed
    pub async fn recv(&mut self) -> Option<Packet> {
        match &mut self.source {
            Source::Window(receiver) => loop {
                match receiver.recv().await {
                    Ok(packet) => return Some(packet),
                    Err(broadcast::error::RecvError::Closed) => return None,
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        debug!(lagged = count, "Subscriber lagged, some packets dropped");
                    }
                }
            },
            Source::Port(receiver) => receiver.recv().await,
        }
    }

    /// Try to receive the next packet without waiting.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(packet))` - A packet was available
    /// - `Ok(None)` - Nothing queued
    /// - `Err(TransportError::Closed)` - The transport was closed
    pub fn try_recv(&mut self) -> Result<Option<Packet>, TransportError> {
        match &mut self.source {
            Source::Window(receiver) => loop {
                match receiver.try_recv() {
                    Ok(packet) => return Ok(Some(packet)),
                    Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                    Err(broadcast::error::TryRecvError::Closed) => {
                        return Err(TransportError::Closed)
                    }
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                }
            },
            Source::Port(receiver) => match receiver.try_recv() {
                Ok(packet) => Ok(Some(packet)),
                Err(mpsc::error::TryRecvError::Empty) => Ok(None),
                Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Closed),
            },
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        match self.source {
            Source::Window(_) => debug!("Window listener released"),
            Source::Port(_) => debug!("Port listener released"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Transport, WindowTransport};
    use serde_json::json;

    #[test]
    fn test_try_recv_empty() {
        let (_a, b) = WindowTransport::pair("https://host", "https://frame");
        let mut sub = b.subscribe().unwrap();
        assert!(matches!(sub.try_recv(), Ok(None)));
    }

    #[test]
    fn test_try_recv_packet() {
        let (a, b) = WindowTransport::pair("https://host", "https://frame");
        let mut sub = b.subscribe().unwrap();

        a.post(Packet::new(json!({"n": 1}))).unwrap();

        let packet = sub.try_recv().unwrap().expect("packet");
        assert_eq!(packet.data, json!({"n": 1}));
    }

    #[test]
    fn test_lagged_subscriber_skips_ahead() {
        let (a, b) = WindowTransport::with_capacity("https://host", "https://frame", 2);
        let mut sub = b.subscribe().unwrap();

        for n in 0..5 {
            a.post(Packet::new(json!(n))).unwrap();
        }

        let packet = sub.try_recv().unwrap().expect("packet");
        assert_eq!(packet.data, json!(3));
    }
}
