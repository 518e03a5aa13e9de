//! Channel: membership authority and broadcast fan-out

use crate::client::Client;
use crate::errors::{HubError, HubResult};
use crate::message::{message_types, MessageBuilder, MessageOptions, MessagePayload, MetadataSelection};
use crate::transport::Transport;
use crate::types::{ChannelId, ClientId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default member capacity for channels created without an explicit limit
pub const DEFAULT_MEMBER_LIMIT: usize = 5;

/// Options for a single add/remove membership operation
#[derive(Debug, Clone, Copy)]
pub struct MemberOptions {
    /// Send the affected client a join/leave notification envelope
    pub notify: bool,
    /// Send the requester a `CHANNEL_FULL` error envelope on a full channel
    pub notify_when_full: bool,
}

impl Default for MemberOptions {
    fn default() -> Self {
        Self {
            notify: true,
            notify_when_full: false,
        }
    }
}

impl MemberOptions {
    pub fn silent() -> Self {
        Self {
            notify: false,
            notify_when_full: false,
        }
    }

    pub fn notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }

    pub fn notify_when_full(mut self, notify_when_full: bool) -> Self {
        self.notify_when_full = notify_when_full;
        self
    }
}

/// Outcome of an `add_member` call
///
/// Expected failures are variants, not errors; `Failed` is reserved for a
/// coordination step going wrong after the membership slot was taken, in
/// which case the insertion has been rolled back.
#[derive(Debug)]
pub enum AddMemberResult {
    Added(Arc<Client>),
    AlreadyMember,
    Full,
    Failed(HubError),
}

impl AddMemberResult {
    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added(_))
    }

    /// Stable reason tag for logging and assertions
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Added(_) => "ok",
            Self::AlreadyMember => "already_member",
            Self::Full => "full",
            Self::Failed(_) => "error",
        }
    }
}

/// Per-recipient accounting for one broadcast
#[derive(Debug, Default)]
pub struct BroadcastResult {
    /// Recipients the message was written to (or, on the pub/sub path, the
    /// member count at publish time)
    pub delivered: usize,
    /// Members skipped by the exclusion filter or the send-state gate
    pub skipped: usize,
    /// Per-recipient transport failures; never aborts the fan-out
    pub failures: Vec<(ClientId, HubError)>,
}

impl BroadcastResult {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Point-in-time channel statistics
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub id: ChannelId,
    pub name: String,
    pub member_count: usize,
    pub limit: usize,
    pub created_at: DateTime<Utc>,
    pub is_empty: bool,
}

/// A named topic with a bounded member set
///
/// The channel is the membership authority: the capacity check and the
/// insertion happen in one critical section under the channel's lock, so
/// the member count never exceeds the limit at any observable instant.
pub struct Channel {
    id: ChannelId,
    name: String,
    limit: usize,
    created_at: DateTime<Utc>,
    inner: RwLock<ChannelInner>,
}

struct ChannelInner {
    members: HashMap<ClientId, Arc<Client>>,
    metadata: HashMap<String, String>,
    publisher: Option<Arc<dyn Transport>>,
}

impl Channel {
    pub fn new<I: Into<ChannelId>, N: Into<String>>(id: I, name: N) -> Self {
        Self::with_limit(id, name, DEFAULT_MEMBER_LIMIT)
    }

    pub fn with_limit<I: Into<ChannelId>, N: Into<String>>(id: I, name: N, limit: usize) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            limit,
            created_at: Utc::now(),
            inner: RwLock::new(ChannelInner {
                members: HashMap::new(),
                metadata: HashMap::new(),
                publisher: None,
            }),
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Bind the shared pub/sub server used by the broadcast fast path
    pub(crate) async fn bind_publisher(&self, publisher: Arc<dyn Transport>) {
        let mut inner = self.inner.write().await;
        inner.publisher = Some(publisher);
    }

    /// Add a client to the channel
    ///
    /// On success the client is subscribed to this channel's topic and
    /// tracks the channel. Any failure after the membership slot is taken
    /// rolls the insertion back and reports `Failed`.
    pub async fn add_member(
        self: &Arc<Self>,
        client: &Arc<Client>,
        options: MemberOptions,
    ) -> AddMemberResult {
        // Capacity check and insertion form one critical section; two
        // concurrent joins cannot both pass the check.
        {
            let mut inner = self.inner.write().await;
            if inner.members.contains_key(client.id().as_str()) {
                return AddMemberResult::AlreadyMember;
            }
            if inner.members.len() >= self.limit {
                drop(inner);
                if options.notify_when_full {
                    self.notify_full(client).await;
                }
                return AddMemberResult::Full;
            }
            inner.members.insert(client.id().clone(), client.clone());
        }

        // Without the subscribe the client would never see topic publishes.
        if let Err(error) = client.subscribe(self.id.as_str()).await {
            warn!(channel = %self.id, client = %client.id(), %error, "subscribe failed; rolling back join");
            self.rollback_member(client).await;
            return AddMemberResult::Failed(error.into());
        }

        client.track_channel(self).await;

        if options.notify {
            let payload = MessagePayload::with_content(
                message_types::CLIENT_JOIN_CHANNEL,
                json!({
                    "message": format!("Joined channel \"{}\"", self.name),
                    "channel": { "id": self.id, "name": self.name },
                }),
            )
            .on_channel(self.id.as_str());

            if let Err(error) = client.send(payload, MessageOptions::default()).await {
                warn!(channel = %self.id, client = %client.id(), %error, "join notification failed; rolling back");
                self.rollback_member(client).await;
                return AddMemberResult::Failed(error);
            }
        }

        info!(channel = %self.id, client = %client.id(), "member joined");
        AddMemberResult::Added(client.clone())
    }

    async fn rollback_member(&self, client: &Arc<Client>) {
        {
            let mut inner = self.inner.write().await;
            inner.members.remove(client.id().as_str());
        }
        client.unsubscribe(self.id.as_str()).await;
        client.untrack_channel(self.id.as_str()).await;
    }

    async fn notify_full(&self, client: &Arc<Client>) {
        let payload = MessagePayload::with_content(
            message_types::ERROR,
            json!({
                "code": "CHANNEL_FULL",
                "channel": self.id,
                "message": format!("Channel \"{}\" is full ({} members)", self.id, self.limit),
            }),
        );
        // Server-originated error: no timestamp, no sender attribution
        match MessageBuilder::render(&payload, &MessageOptions::new().without_timestamp()) {
            Ok(bytes) => {
                if let Err(error) = client.write_raw(&bytes).await {
                    warn!(channel = %self.id, client = %client.id(), %error, "channel-full notice failed");
                }
            }
            Err(error) => warn!(channel = %self.id, %error, "channel-full notice failed to serialize"),
        }
    }

    /// Remove a client from the channel; `None` when it was not a member
    pub async fn remove_member(
        &self,
        client_id: &str,
        options: MemberOptions,
    ) -> Option<Arc<Client>> {
        let client = {
            let mut inner = self.inner.write().await;
            inner.members.remove(client_id)?
        };

        client.unsubscribe(self.id.as_str()).await;
        client.untrack_channel(self.id.as_str()).await;

        if options.notify {
            let payload = MessagePayload::with_content(
                message_types::CLIENT_LEAVE_CHANNEL,
                json!({
                    "message": format!("Left channel \"{}\"", self.name),
                    "channel": { "id": self.id, "name": self.name },
                }),
            )
            .on_channel(self.id.as_str());

            if let Err(error) = client.send(payload, MessageOptions::default()).await {
                warn!(channel = %self.id, client = %client.id(), %error, "leave notification failed");
            }
        }

        info!(channel = %self.id, client = %client_id, "member left");
        Some(client)
    }

    /// Broadcast a message to the channel
    ///
    /// Without exclusions this is a single topic publish; with exclusions
    /// the serialized bytes are written to each non-excluded member
    /// directly. Per-recipient failures are confined to the result.
    pub async fn broadcast(
        &self,
        payload: impl Into<MessagePayload>,
        options: MessageOptions,
    ) -> HubResult<BroadcastResult> {
        let mut payload = payload.into();
        payload.channel = Some(self.id.to_string());

        let mut options = options;
        if let Some(selection) = &options.include_metadata {
            options.metadata = Some(self.metadata_for(selection).await);
        }

        let envelope = MessageBuilder::build(&payload, &options);
        let bytes = MessageBuilder::serialize(&envelope, options.transform.as_ref())?;

        if options.exclude_clients.is_empty() {
            return self.publish(&bytes).await;
        }

        let excluded: HashSet<&str> = options
            .exclude_clients
            .iter()
            .map(|id| id.as_str())
            .collect();
        let members: Vec<Arc<Client>> = {
            let inner = self.inner.read().await;
            inner.members.values().cloned().collect()
        };

        let mut result = BroadcastResult::default();
        for member in members {
            if excluded.contains(member.id().as_str()) {
                result.skipped += 1;
                continue;
            }
            match member.write_raw(&bytes).await {
                Ok(true) => result.delivered += 1,
                Ok(false) => result.skipped += 1,
                Err(error) => {
                    warn!(channel = %self.id, client = %member.id(), %error, "fan-out write failed");
                    result.failures.push((member.id().clone(), error.into()));
                }
            }
        }
        Ok(result)
    }

    async fn publish(&self, bytes: &[u8]) -> HubResult<BroadcastResult> {
        let (publisher, member_count) = {
            let inner = self.inner.read().await;
            (inner.publisher.clone(), inner.members.len())
        };
        let publisher = publisher.ok_or(HubError::TransportNotSet)?;

        match publisher.publish(self.id.as_str(), bytes).await {
            Ok(()) => Ok(BroadcastResult {
                delivered: member_count,
                ..Default::default()
            }),
            Err(error) => {
                // Confined: a failed publish never unwinds past the broadcast
                warn!(channel = %self.id, %error, "topic publish failed");
                Ok(BroadcastResult::default())
            }
        }
    }

    pub async fn has_member(&self, client_id: &str) -> bool {
        self.inner.read().await.members.contains_key(client_id)
    }

    pub async fn get_member(&self, client_id: &str) -> Option<Arc<Client>> {
        self.inner.read().await.members.get(client_id).cloned()
    }

    pub async fn members(&self) -> Vec<Arc<Client>> {
        self.inner.read().await.members.values().cloned().collect()
    }

    /// Members passing the given filter
    pub async fn members_where<F>(&self, mut filter: F) -> Vec<Arc<Client>>
    where
        F: FnMut(&Arc<Client>) -> bool,
    {
        self.inner
            .read()
            .await
            .members
            .values()
            .filter(|member| filter(member))
            .cloned()
            .collect()
    }

    pub async fn member_ids(&self) -> Vec<ClientId> {
        self.inner.read().await.members.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.members.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.members.is_empty()
    }

    pub async fn can_add_member(&self) -> bool {
        self.inner.read().await.members.len() < self.limit
    }

    pub async fn set_metadata<K: Into<String>, V: Into<String>>(&self, key: K, value: V) {
        let mut inner = self.inner.write().await;
        inner.metadata.insert(key.into(), value.into());
    }

    pub async fn get_metadata(&self, key: &str) -> Option<String> {
        self.inner.read().await.metadata.get(key).cloned()
    }

    pub async fn remove_metadata(&self, key: &str) -> Option<String> {
        self.inner.write().await.metadata.remove(key)
    }

    pub async fn metadata(&self) -> HashMap<String, String> {
        self.inner.read().await.metadata.clone()
    }

    async fn metadata_for(&self, selection: &MetadataSelection) -> Map<String, Value> {
        let inner = self.inner.read().await;
        let mut map = Map::new();
        match selection {
            MetadataSelection::All => {
                for (key, value) in &inner.metadata {
                    map.insert(key.clone(), Value::String(value.clone()));
                }
            }
            MetadataSelection::Keys(keys) => {
                for key in keys {
                    if let Some(value) = inner.metadata.get(key) {
                        map.insert(key.clone(), Value::String(value.clone()));
                    }
                }
            }
        }
        map
    }

    /// Evacuate every member (with notification), then clear the channel
    pub async fn delete(&self) {
        let member_ids = self.member_ids().await;
        for client_id in member_ids {
            self.remove_member(client_id.as_str(), MemberOptions::default())
                .await;
        }

        let mut inner = self.inner.write().await;
        inner.metadata.clear();
        debug!(channel = %self.id, "channel deleted");
    }

    pub async fn stats(&self) -> ChannelStats {
        let inner = self.inner.read().await;
        ChannelStats {
            id: self.id.clone(),
            name: self.name.clone(),
            member_count: inner.members.len(),
            limit: self.limit,
            created_at: self.created_at,
            is_empty: inner.members.is_empty(),
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}
