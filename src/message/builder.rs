//! Envelope construction pipeline
//!
//! Separates what goes on the wire ([`Envelope`]) from how the send is
//! processed ([`MessageOptions`]). Options are applied in a fixed order so
//! the resulting envelope is deterministic for a given payload + options
//! pair.

use super::envelope::{message_types, Envelope};
use crate::errors::HubResult;
use crate::types::{ClientId, EntityIdentity};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

/// Envelope keys that cannot be shadowed by `custom_fields`
const RESERVED_KEYS: [&str; 8] = [
    "type",
    "channel",
    "content",
    "timestamp",
    "client",
    "metadata",
    "priority",
    "expiresAt",
];

/// Post-build mapper applied at serialization time
///
/// Replaces the envelope wholesale: whatever JSON value the transform
/// returns is what goes on the wire.
pub type Transform = Arc<dyn Fn(Envelope) -> Value + Send + Sync>;

/// Caller-supplied message payload
#[derive(Debug, Clone)]
pub struct MessagePayload {
    /// Message type tag, e.g. `"message"` or one of [`message_types`]
    pub kind: String,
    /// Channel the payload targets; falls back to `MessageOptions::channel`
    pub channel: Option<String>,
    /// Body: a string (wrapped as `{"message": …}`), an object
    /// (shallow-copied), or anything else (coerced to `{}`)
    pub content: Value,
}

impl MessagePayload {
    pub fn new<T: Into<String>>(kind: T) -> Self {
        Self {
            kind: kind.into(),
            channel: None,
            content: Value::Null,
        }
    }

    pub fn with_content<T: Into<String>>(kind: T, content: Value) -> Self {
        Self {
            kind: kind.into(),
            channel: None,
            content,
        }
    }

    /// Plain text message of the given type
    pub fn text<K: Into<String>, M: Into<String>>(kind: K, message: M) -> Self {
        Self::with_content(kind, Value::String(message.into()))
    }

    pub fn on_channel<T: Into<String>>(mut self, channel: T) -> Self {
        self.channel = Some(channel.into());
        self
    }
}

impl From<&str> for MessagePayload {
    /// A bare string is a `"message"` payload
    fn from(message: &str) -> Self {
        Self::text(message_types::MESSAGE, message)
    }
}

impl From<String> for MessagePayload {
    fn from(message: String) -> Self {
        Self::text(message_types::MESSAGE, message)
    }
}

/// Which channel metadata entries a broadcast attaches
#[derive(Debug, Clone)]
pub enum MetadataSelection {
    /// Attach the full metadata map
    All,
    /// Attach only the listed keys, where present
    Keys(Vec<String>),
}

/// Server-side processing options for a single send
///
/// None of these fields ever appear in the serialized envelope.
#[derive(Clone)]
pub struct MessageOptions {
    /// Merged into `content` when an object (and not an array); otherwise
    /// placed under `content.data`
    pub data: Option<Value>,
    /// Sender attribution; ignored when the id is empty, name defaults to
    /// `"Unknown"`
    pub client: Option<EntityIdentity>,
    /// Literal metadata object to attach. A channel broadcast overwrites
    /// this when `include_metadata` requests channel metadata.
    pub metadata: Option<Map<String, Value>>,
    /// Channel metadata request, honored by `Channel::broadcast`
    pub include_metadata: Option<MetadataSelection>,
    /// Recipient filter: listed clients do not receive the message
    pub exclude_clients: Vec<ClientId>,
    /// Channel override when the payload carries none
    pub channel: Option<String>,
    /// Stamp the envelope with build time (default true)
    pub include_timestamp: bool,
    /// Root-level fields merged into the envelope; reserved keys are dropped
    pub custom_fields: Map<String, Value>,
    /// Post-build mapper, applied last; replaces the envelope wholesale
    pub transform: Option<Transform>,
    /// Delivery priority 0..=2; out-of-range values are clamped
    pub priority: Option<u8>,
    /// Expiry, milliseconds since epoch
    pub expires_at: Option<i64>,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self {
            data: None,
            client: None,
            metadata: None,
            include_metadata: None,
            exclude_clients: Vec::new(),
            channel: None,
            include_timestamp: true,
            custom_fields: Map::new(),
            transform: None,
            priority: None,
            expires_at: None,
        }
    }
}

impl MessageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: EntityIdentity) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn on_channel<T: Into<String>>(mut self, channel: T) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn without_timestamp(mut self) -> Self {
        self.include_timestamp = false;
        self
    }

    pub fn excluding<I, T>(mut self, clients: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ClientId>,
    {
        self.exclude_clients = clients.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_channel_metadata(mut self) -> Self {
        self.include_metadata = Some(MetadataSelection::All);
        self
    }

    pub fn with_channel_metadata_keys<I, T>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.include_metadata = Some(MetadataSelection::Keys(
            keys.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Envelope) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn expiring_at(mut self, epoch_ms: i64) -> Self {
        self.expires_at = Some(epoch_ms);
        self
    }

    pub fn with_custom_field<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.custom_fields.insert(key.into(), value);
        self
    }
}

impl std::fmt::Debug for MessageOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageOptions")
            .field("data", &self.data)
            .field("client", &self.client)
            .field("channel", &self.channel)
            .field("include_timestamp", &self.include_timestamp)
            .field("exclude_clients", &self.exclude_clients)
            .field("priority", &self.priority)
            .field("expires_at", &self.expires_at)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// Builds immutable wire envelopes from (payload, options) and serializes
/// them
pub struct MessageBuilder;

impl MessageBuilder {
    /// Produce an envelope from a payload and options
    ///
    /// Options apply in a fixed order: data, client, metadata, timestamp,
    /// priority/expiry, custom fields. The `transform` option is not applied
    /// here; see [`MessageBuilder::serialize`].
    pub fn build(payload: &MessagePayload, options: &MessageOptions) -> Envelope {
        let mut envelope = Envelope {
            kind: payload.kind.clone(),
            channel: payload.channel.clone().or_else(|| options.channel.clone()),
            content: normalize_content(&payload.content),
            ..Default::default()
        };

        if let Some(data) = &options.data {
            match data {
                Value::Object(map) => {
                    for (key, value) in map {
                        envelope.content.insert(key.clone(), value.clone());
                    }
                }
                other => {
                    envelope.content.insert("data".to_string(), other.clone());
                }
            }
        }

        if let Some(identity) = &options.client {
            if !identity.id.is_empty() {
                let name = if identity.name.is_empty() {
                    "Unknown".to_string()
                } else {
                    identity.name.clone()
                };
                envelope.client = Some(EntityIdentity::new(identity.id.clone(), name));
            }
        }

        if let Some(metadata) = &options.metadata {
            envelope.metadata = Some(metadata.clone());
        }

        if options.include_timestamp {
            envelope.timestamp = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        }

        if let Some(priority) = options.priority {
            envelope.priority = Some(priority.min(2));
        }
        if let Some(expires_at) = options.expires_at {
            envelope.expires_at = Some(expires_at);
        }

        for (key, value) in &options.custom_fields {
            if RESERVED_KEYS.contains(&key.as_str()) {
                warn!(field = %key, "dropping custom field shadowing an envelope key");
                continue;
            }
            envelope.extra.insert(key.clone(), value.clone());
        }

        envelope
    }

    /// Serialize an envelope, applying the transform if one is given
    ///
    /// The transform output replaces the envelope wholesale.
    pub fn serialize(envelope: &Envelope, transform: Option<&Transform>) -> HubResult<Vec<u8>> {
        let bytes = match transform {
            Some(transform) => serde_json::to_vec(&transform(envelope.clone()))?,
            None => serde_json::to_vec(envelope)?,
        };
        Ok(bytes)
    }

    /// Build and serialize in one step
    pub fn render(payload: &MessagePayload, options: &MessageOptions) -> HubResult<Vec<u8>> {
        let envelope = Self::build(payload, options);
        Self::serialize(&envelope, options.transform.as_ref())
    }
}

/// Normalize a payload body into the envelope content map
///
/// Strings wrap as `{"message": …}`, objects shallow-copy, anything else
/// coerces to an empty map.
fn normalize_content(value: &Value) -> Map<String, Value> {
    match value {
        Value::String(message) => {
            let mut content = Map::new();
            content.insert("message".to_string(), Value::String(message.clone()));
            content
        }
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}
