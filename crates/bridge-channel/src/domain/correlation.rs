//! Correlation ID linking a request to its response.
//!
//! Random UUID v4, the same shape a browser's `crypto.randomUUID()` produces,
//! so peers written against other runtimes interoperate. Only ids we generate
//! are typed; ids arriving from a peer stay plain strings on the
//! [`Message`](crate::Message) and compare equal to a `CorrelationId` when
//! they parse to the same UUID.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlation ID for matching a response to the request that caused it.
///
/// Unique per logical request, not per message: a response carries the id of
/// its request unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new correlation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<CorrelationId> for Uuid {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.to_string()
    }
}

impl PartialEq<str> for CorrelationId {
    fn eq(&self, other: &str) -> bool {
        Self::parse(other).is_ok_and(|id| id == *self)
    }
}

impl PartialEq<String> for CorrelationId {
    fn eq(&self, other: &String) -> bool {
        *self == *other.as_str()
    }
}

impl PartialEq<CorrelationId> for String {
    fn eq(&self, other: &CorrelationId) -> bool {
        *other == *self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_correlation_id() {
        let id1 = CorrelationId::new();
        let id2 = CorrelationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = CorrelationId::new();
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_string()));
    }

    #[test]
    fn test_display_is_hyphenated() {
        let display = CorrelationId::new().to_string();
        assert_eq!(display.len(), 36); // 8-4-4-4-12
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CorrelationId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_compares_with_wire_strings() {
        let id = CorrelationId::new();
        assert_eq!(id.to_string(), id);
        assert_eq!(id, id.to_string().to_uppercase());
        assert_ne!(String::from("req-1"), id);
    }

    #[test]
    fn test_is_v4() {
        assert_eq!(CorrelationId::new().as_uuid().get_version_num(), 4);
    }
}
