//! Wire message model.
//!
//! One JSON object per text frame:
//!
//! ```text
//! { "type": "request", "id": "AbCd1234", "uri": "ssap://audio/getVolume",
//!   "payload": { ... }, "error": "..." }
//! ```
//!
//! `id` is the correlation token. `uri` is absent for pairing messages and
//! `error` is only set on `type="error"`.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Arbitrary JSON object carried in a message.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Message kind.
///
/// Kinds this client does not know about are preserved in [`MessageType::Other`]
/// so they can be reported verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Request,
    Response,
    Error,
    Subscribe,
    Unsubscribe,
    Register,
    Registered,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Error => "error",
            MessageType::Subscribe => "subscribe",
            MessageType::Unsubscribe => "unsubscribe",
            MessageType::Register => "register",
            MessageType::Registered => "registered",
            MessageType::Other(other) => other,
        }
    }
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Other(String::new())
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "request" => MessageType::Request,
            "response" => MessageType::Response,
            "error" => MessageType::Error,
            "subscribe" => MessageType::Subscribe,
            "unsubscribe" => MessageType::Unsubscribe,
            "register" => MessageType::Register,
            "registered" => MessageType::Registered,
            _ => MessageType::Other(value),
        }
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single protocol message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    pub kind: MessageType,

    /// Correlation token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_payload",
        skip_serializing_if = "payload_is_empty"
    )]
    pub payload: Option<Payload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    /// Create a message of the given kind under a correlation token.
    pub fn new(kind: MessageType, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Set the target endpoint.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: Option<Payload>) -> Self {
        self.payload = payload;
        self
    }

    /// True when the message carries no payload or an empty object.
    pub fn has_empty_payload(&self) -> bool {
        payload_is_empty(&self.payload)
    }
}

fn payload_is_empty(payload: &Option<Payload>) -> bool {
    payload.as_ref().map_or(true, |p| p.is_empty())
}

/// `null` or a non-object payload decodes as "no payload" instead of
/// rejecting the whole message.
fn deserialize_payload<'de, D>(deserializer: D) -> Result<Option<Payload>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Object(map) => Ok(Some(map)),
        _ => Ok(None),
    }
}
