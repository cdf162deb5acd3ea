//! Domain types for the channel.
//!
//! Wire model, correlation engine, identity guard, configuration and errors.
//! Nothing here touches a transport.

pub mod config;
pub mod correlation;
pub mod error;
pub mod identity;
pub mod message;
pub mod pending;
pub mod stats;

// Re-exports for convenience
pub use config::{ChannelConfig, ConfigError, HandshakeMode, UnmatchedResponsePolicy};
pub use correlation::CorrelationId;
pub use error::{ChannelError, ChannelResult, IdentityError, RegistrationError};
pub use identity::ChannelIdentity;
pub use message::{HandshakeSignals, Message, CONNECT_EVENT, DEFAULT_NAMESPACE, RESPONSE_EVENT};
pub use pending::{PendingRequestStore, PendingResponse};
pub use stats::{ChannelStats, StatsSnapshot};
