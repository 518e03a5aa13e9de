//! Wire envelope structure and reserved message types

use crate::types::EntityIdentity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved message type identifiers
///
/// Stable string values; applications may define their own types outside
/// this set.
pub mod message_types {
    pub const CLIENT_CONNECTED: &str = "client.connected";
    pub const CLIENT_DISCONNECTED: &str = "client.disconnected";
    pub const CLIENT_JOIN_CHANNEL: &str = "client.join.channel";
    pub const CLIENT_LEAVE_CHANNEL: &str = "client.leave.channel";
    pub const CLIENT_JOIN_CHANNELS: &str = "client.join.channels";
    pub const CLIENT_LEAVE_CHANNELS: &str = "client.leave.channels";
    pub const CLIENT_MESSAGE_RECEIVED: &str = "client.message.received";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const MESSAGE: &str = "message";
    pub const WHISPER: &str = "whisper";
    pub const BROADCAST: &str = "broadcast";
    pub const PROMPT: &str = "prompt";
    pub const ERROR: &str = "error";
    pub const SYSTEM: &str = "system";
}

/// The JSON structure placed on the wire
///
/// Built by [`MessageBuilder`](super::MessageBuilder), immutable once built.
/// Transport and processing options never appear here; they live on
/// [`MessageOptions`](super::MessageOptions), a separate type, so leaking
/// them into the serialized form is impossible by construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,

    /// Channel the message belongs to; omitted from the wire when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Open-ended message body
    pub content: Map<String, Value>,

    /// ISO 8601 build time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Sender attribution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<EntityIdentity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,

    /// Delivery priority: 0, 1 or 2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    /// Expiry, milliseconds since epoch
    #[serde(
        rename = "expiresAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<i64>,

    /// Caller-supplied root-level fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Channel label for display and logging; `"N/A"` when unset
    pub fn channel_label(&self) -> &str {
        self.channel.as_deref().unwrap_or("N/A")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unset_fields_are_absent_from_wire() {
        let envelope = Envelope {
            kind: "pong".to_string(),
            content: {
                let mut content = Map::new();
                content.insert("message".to_string(), json!("pong"));
                content
            },
            ..Default::default()
        };

        let bytes = serde_json::to_vec(&envelope).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"type":"pong","content":{"message":"pong"}}"#
        );
    }

    #[test]
    fn channel_label_defaults() {
        let envelope = Envelope::default();
        assert_eq!(envelope.channel_label(), "N/A");

        let envelope = Envelope {
            channel: Some("lobby".to_string()),
            ..Default::default()
        };
        assert_eq!(envelope.channel_label(), "lobby");
    }

    #[test]
    fn extra_fields_flatten_to_root() {
        let mut extra = Map::new();
        extra.insert("traceId".to_string(), json!("t-1"));
        let envelope = Envelope {
            kind: "system".to_string(),
            extra,
            ..Default::default()
        };

        let value: Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["traceId"], json!("t-1"));
        assert_eq!(value["type"], json!("system"));
    }

    #[test]
    fn deserializes_wire_form() {
        let raw = r#"{"type":"message","channel":"lobby","content":{"message":"hi"},
            "timestamp":"2024-01-01T00:00:00.000Z","client":{"id":"u1","name":"A"}}"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();

        assert_eq!(envelope.kind, "message");
        assert_eq!(envelope.channel.as_deref(), Some("lobby"));
        assert_eq!(envelope.content["message"], json!("hi"));
        assert_eq!(envelope.client.unwrap().id.as_str(), "u1");
    }
}
