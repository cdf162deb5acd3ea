//! # Bridge Channel - Request/Response Over an Unordered Message Transport
//!
//! Turns a raw transport ("post a message, maybe get unrelated messages
//! back, in any order") into a channel with correlated requests, timeouts,
//! one handler per event name and an explicit handshake.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          Channel                              │
//! │                                                               │
//! │  trigger ─→ ┌─────────────────────┐        ┌───────────────┐  │
//! │             │ Pending Request     │        │ Handler Table │  │
//! │  Pending ←─ │ Store (uuid → tx)   │        │ (event → fn)  │  │
//! │  Response   └──────────▲──────────┘        └───────▲───────┘  │
//! │                        │ response                  │ event    │
//! │                 ┌──────┴───────────────────────────┴──────┐   │
//! │                 │ Listener: decode → identity guard → route│   │
//! │                 └──────────────────────▲──────────────────┘   │
//! └────────────────────────────────────────┼──────────────────────┘
//!                                          │
//!                 shared transport, or a dedicated port agreed
//!                 during the handshake
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_channel::{Channel, WindowTransport};
//! use std::sync::Arc;
//!
//! let (host, frame) = WindowTransport::pair("https://host", "https://frame");
//! let host = Channel::new(Some(Arc::new(host)))?;
//! let frame = Channel::new(Some(Arc::new(frame)))?;
//!
//! frame.on("ping", |n, _origin| async move { Ok(json!(n.as_i64().unwrap_or(0) + 1)) })?;
//! tokio::try_join!(frame.open(), host.connect())?;
//!
//! assert_eq!(host.trigger("ping", 41, None)?.await?, json!(42));
//! ```
//!
//! ## Modules
//!
//! - [`domain`]: wire message, correlation store, identity guard, config, errors
//! - [`dispatch`]: handler table and response synthesis
//! - [`channel`]: the channel and its handshakes
//! - [`lite`]: handshake-free free functions over a shared transport
//! - [`telemetry`]: log subscriber setup

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod channel;
pub mod dispatch;
pub mod domain;
pub mod lite;
pub mod telemetry;

mod outbound;

// Re-export main types
pub use channel::{Channel, LinkState};
pub use dispatch::{EventHandler, HandlerError, HandlerResult, HandlerTable, Registration, Responder};
pub use domain::{
    ChannelConfig, ChannelError, ChannelIdentity, ChannelResult, ConfigError, CorrelationId,
    HandshakeMode, IdentityError, Message, PendingResponse, RegistrationError, StatsSnapshot,
    UnmatchedResponsePolicy,
};
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError};

pub use bridge_transport::{Packet, Port, Transport, TransportError, WindowTransport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
