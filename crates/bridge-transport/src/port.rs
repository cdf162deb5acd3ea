//! # Dedicated Ports
//!
//! A port is one end of a private two-ended pipe. The context that opens the
//! pipe keeps one end and transfers the other inside a [`Packet`]. From then
//! on the two ends talk only to each other.

use crate::subscription::Subscription;
use crate::transport::{Packet, Transport, TransportError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// One end of a dedicated duplex pipe.
///
/// Cloning a port clones the handle, not the pipe. Only one clone may ever
/// start listening.
#[derive(Clone)]
pub struct Port {
    inner: Arc<PortInner>,
}

struct PortInner {
    /// Origin of the context that opened the pipe.
    origin: String,
    /// Sender into the other end's queue.
    tx: mpsc::UnboundedSender<Packet>,
    /// Our own queue, taken on start.
    rx: Mutex<Option<mpsc::UnboundedReceiver<Packet>>>,
}

impl Port {
    /// Open a new pipe and return both ends.
    #[must_use]
    pub fn pair(origin: impl Into<String>) -> (Port, Port) {
        let origin = origin.into();
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Port {
            inner: Arc::new(PortInner {
                origin: origin.clone(),
                tx: tx_b,
                rx: Mutex::new(Some(rx_a)),
            }),
        };
        let b = Port {
            inner: Arc::new(PortInner {
                origin,
                tx: tx_a,
                rx: Mutex::new(Some(rx_b)),
            }),
        };

        debug!(origin = %a.inner.origin, "Opened dedicated port pair");
        (a, b)
    }

    /// Whether some handle already started this end.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.rx.lock().is_none()
    }

    /// Whether both handles refer to the same end.
    #[must_use]
    pub fn same_end(&self, other: &Port) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Transport for Port {
    fn origin(&self) -> &str {
        &self.inner.origin
    }

    fn post(&self, packet: Packet) -> Result<(), TransportError> {
        if !packet.ports.is_empty() {
            return Err(TransportError::TransferNotSupported);
        }
        self.inner
            .tx
            .send(packet)
            .map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self) -> Result<Subscription, TransportError> {
        let rx = self
            .inner
            .rx
            .lock()
            .take()
            .ok_or(TransportError::AlreadyStarted)?;
        debug!(origin = %self.inner.origin, "Port started");
        Ok(Subscription::from_port(rx))
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("origin", &self.inner.origin)
            .field("started", &self.is_started())
            .finish()
    }
}
