//! # Wire Message
//!
//! The JSON envelope both endpoints exchange, plus the sentinel strings used
//! by the port handshakes.
//!
//! ```text
//! { "type": "ping", "uuid": "…", "origin": "https://host", "payload": {…},
//!   "error"?: "…", "channelId"?: "…", "noResponse"?: true }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event type reserved for responses.
pub const RESPONSE_EVENT: &str = "response";

/// Event type of the channel-id handshake request.
pub const CONNECT_EVENT: &str = "connect";

/// Default namespace of the port handshake sentinels.
pub const DEFAULT_NAMESPACE: &str = "bridge-editor";

/// The envelope of every request, event and response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Event name, or `"response"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Correlation ID of the logical request.
    ///
    /// Opaque on the wire: ids we generate are UUID v4 strings, ids from a
    /// peer are echoed back verbatim whatever their shape.
    pub uuid: String,

    /// Origin of the sender. Informational only.
    pub origin: String,

    /// Application data.
    #[serde(default)]
    pub payload: Value,

    /// Present only on failed responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Logical channel this message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,

    /// Set on fire-and-forget sends; the receiver must not reply.
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_response: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Message {
    /// A request for `event`.
    pub fn request(
        event: impl Into<String>,
        uuid: impl Into<String>,
        origin: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind: event.into(),
            uuid: uuid.into(),
            origin: origin.into(),
            payload,
            error: None,
            channel_id: None,
            no_response: false,
        }
    }

    /// A successful response to request `uuid`.
    pub fn response(uuid: impl Into<String>, origin: impl Into<String>, payload: Value) -> Self {
        Self::request(RESPONSE_EVENT, uuid, origin, payload)
    }

    /// A failed response to request `uuid`.
    pub fn failure(
        uuid: impl Into<String>,
        origin: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut message = Self::response(uuid, origin, Value::Null);
        message.error = Some(error.into());
        message
    }

    /// Mark as fire-and-forget.
    #[must_use]
    pub fn fire_and_forget(mut self) -> Self {
        self.no_response = true;
        self
    }

    /// Whether this is a response rather than an event.
    pub fn is_response(&self) -> bool {
        self.kind == RESPONSE_EVENT
    }

    /// Decode raw transport data. Anything that is not an envelope yields
    /// `None`.
    pub fn decode(data: &Value) -> Option<Self> {
        if !data.is_object() {
            return None;
        }
        serde_json::from_value(data.clone()).ok()
    }

    /// Encode for the transport.
    pub fn encode(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Sentinel strings of the port handshakes, derived from a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeSignals {
    /// Carries a transferred pipe end.
    pub connect: String,
    /// Acknowledgment triggered over the new pipe.
    pub connected: String,
    /// Readiness announcement of the requester.
    pub connection_request: String,
}

impl HandshakeSignals {
    pub fn new(namespace: &str) -> Self {
        Self {
            connect: format!("{namespace}:connect"),
            connected: format!("{namespace}:connected"),
            connection_request: format!("{namespace}:connection-request"),
        }
    }
}

impl Default for HandshakeSignals {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}
