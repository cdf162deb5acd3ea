//! # Bridge Transport - Raw Message Passing Between Isolated Contexts
//!
//! The transport is the collaborator a bridge channel is built on. It moves
//! opaque JSON packets between two execution contexts that share no memory.
//! It gives no correlation, no ordering between senders and no backpressure.
//!
//! ## Topology
//!
//! ```text
//! ┌──────────────┐      post()       ┌──────────────┐
//! │   Window A   │ ────────────────→ │   Window B   │
//! │              │ ←──────────────── │              │
//! └──────────────┘      post()       └──────────────┘
//!        │                                  │
//!        └──────────── Port pair ───────────┘
//!             (dedicated duplex pipe, transferred
//!              inside a packet during handshake)
//! ```
//!
//! - [`WindowTransport`]: shared broadcast-style transport. Every subscriber
//!   of a window sees every packet posted to it.
//! - [`Port`]: one end of a private pipe. Started (subscribed) exactly once.
//! - [`Subscription`]: owned listener handle, released on drop.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod port;
pub mod subscription;
pub mod transport;
pub mod window;

// Re-export main types
pub use port::Port;
pub use subscription::Subscription;
pub use transport::{Packet, Transport, TransportError};
pub use window::WindowTransport;

/// Maximum packets buffered per window subscriber before old ones are skipped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
