//! Hub: process-wide registry and lifecycle coordinator
//!
//! One hub per process (or per test). It owns the client and channel
//! registries, bootstraps the global channel, reacts to transport lifecycle
//! events and fronts broadcast/join/leave for callers that only hold ids.

use crate::channel::{AddMemberResult, BroadcastResult, Channel, MemberOptions, DEFAULT_MEMBER_LIMIT};
use crate::client::Client;
use crate::config::HubConfig;
use crate::errors::{HubError, HubResult};
use crate::message::{message_types, MessageBuilder, MessageOptions, MessagePayload};
use crate::transport::Transport;
use crate::types::{ChannelId, ClientId};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Id (and transport topic) of the channel every client joins on connect
pub const GLOBAL_CHANNEL_ID: &str = "global";

/// Point-in-time hub statistics
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub channel_count: usize,
    pub client_count: usize,
}

/// Registry of all clients and channels plus the lifecycle handlers the
/// transport layer drives
pub struct Hub {
    inner: RwLock<HubInner>,
    server: RwLock<Option<Arc<dyn Transport>>>,
    config: HubConfig,
}

struct HubInner {
    channels: HashMap<ChannelId, Arc<Channel>>,
    clients: HashMap<ClientId, Arc<Client>>,
}

impl Hub {
    /// Construct a hub, bootstrapping the `"global"` channel (or installing
    /// the configured seed in its place)
    pub fn new(config: HubConfig) -> Self {
        let channels = match &config.channels_seed {
            Some(seed) => seed.clone(),
            None => {
                let global = build_channel(
                    &config,
                    GLOBAL_CHANNEL_ID,
                    "Global",
                    config.global_channel_limit,
                );
                HashMap::from([(global.id().clone(), global)])
            }
        };

        Self {
            inner: RwLock::new(HubInner {
                channels,
                clients: HashMap::new(),
            }),
            server: RwLock::new(None),
            config,
        }
    }

    /// Late-bind the shared pub/sub server; required before any broadcast
    ///
    /// Propagates to every channel, present and future.
    pub async fn set_transport_server(&self, server: Arc<dyn Transport>) {
        {
            let mut slot = self.server.write().await;
            *slot = Some(server.clone());
        }
        let channels: Vec<Arc<Channel>> = {
            let inner = self.inner.read().await;
            inner.channels.values().cloned().collect()
        };
        for channel in channels {
            channel.bind_publisher(server.clone()).await;
        }
    }

    /// Create a channel, or return the existing one with the same id
    pub async fn create_channel<I, N>(&self, id: I, name: N, limit: Option<usize>) -> Arc<Channel>
    where
        I: Into<ChannelId>,
        N: Into<String>,
    {
        let id = id.into();
        if let Some(existing) = self.get_channel(id.as_str()).await {
            return existing;
        }

        // Construct outside the registry lock: the factory is user code.
        let name: String = name.into();
        let channel = build_channel(
            &self.config,
            id.as_str(),
            &name,
            limit.unwrap_or(DEFAULT_MEMBER_LIMIT),
        );

        let channel = {
            let mut inner = self.inner.write().await;
            match inner.channels.get(&id) {
                // Lost the race to a concurrent creation
                Some(existing) => existing.clone(),
                None => {
                    inner.channels.insert(id.clone(), channel.clone());
                    channel
                }
            }
        };

        let server = self.server.read().await.clone();
        if let Some(server) = server {
            channel.bind_publisher(server).await;
        }

        if self.config.debug {
            debug!(channel = %id, "channel created");
        }
        channel
    }

    /// Remove a channel, evacuating its members first
    pub async fn remove_channel(&self, id: &str) -> Option<Arc<Channel>> {
        let channel = {
            let mut inner = self.inner.write().await;
            inner.channels.remove(id)?
        };
        channel.delete().await;
        info!(channel = %id, "channel removed");
        Some(channel)
    }

    pub async fn get_channel(&self, id: &str) -> Option<Arc<Channel>> {
        self.inner.read().await.channels.get(id).cloned()
    }

    pub async fn channels(&self) -> Vec<Arc<Channel>> {
        self.inner.read().await.channels.values().cloned().collect()
    }

    pub async fn channel_count(&self) -> usize {
        self.inner.read().await.channels.len()
    }

    pub async fn get_client(&self, id: &str) -> Option<Arc<Client>> {
        self.inner.read().await.clients.get(id).cloned()
    }

    /// Like [`Hub::get_client`] but an absent client is an error
    pub async fn require_client(&self, id: &str) -> HubResult<Arc<Client>> {
        self.get_client(id)
            .await
            .ok_or_else(|| HubError::client_not_found(id))
    }

    pub async fn clients(&self) -> Vec<Arc<Client>> {
        self.inner.read().await.clients.values().cloned().collect()
    }

    pub async fn client_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    pub async fn stats(&self) -> HubStats {
        let inner = self.inner.read().await;
        HubStats {
            channel_count: inner.channels.len(),
            client_count: inner.clients.len(),
        }
    }

    /// Broadcast a payload on a channel (topic publish of the envelope)
    pub async fn broadcast(
        &self,
        channel_id: &str,
        payload: impl Into<MessagePayload>,
    ) -> HubResult<BroadcastResult> {
        let channel = self
            .get_channel(channel_id)
            .await
            .ok_or_else(|| HubError::channel_not_found(channel_id))?;
        channel.broadcast(payload, MessageOptions::default()).await
    }

    /// Broadcast a payload on every channel
    pub async fn broadcast_all(&self, payload: impl Into<MessagePayload>) {
        let payload = payload.into();
        for channel in self.channels().await {
            if let Err(error) = channel
                .broadcast(payload.clone(), MessageOptions::default())
                .await
            {
                warn!(channel = %channel.id(), %error, "broadcast failed");
            }
        }
    }

    /// Join a tracked client to a channel
    pub async fn join(&self, channel_id: &str, client_id: &str) -> HubResult<AddMemberResult> {
        let channel = self
            .get_channel(channel_id)
            .await
            .ok_or_else(|| HubError::channel_not_found(channel_id))?;
        let client = self.require_client(client_id).await?;
        Ok(client.join_channel(&channel, true).await)
    }

    /// Remove a tracked client from a channel
    pub async fn leave(&self, channel_id: &str, client_id: &str) -> HubResult<Option<Arc<Client>>> {
        let channel = self
            .get_channel(channel_id)
            .await
            .ok_or_else(|| HubError::channel_not_found(channel_id))?;
        Ok(channel
            .remove_member(client_id, MemberOptions::default())
            .await)
    }

    /// Transport lifecycle: a connection finished its upgrade
    ///
    /// Registers a client for the connection, welcomes it and joins it to
    /// the global channel. The user `open` hook runs last.
    pub async fn on_open(&self, conn: Arc<dyn Transport>) -> HubResult<Arc<Client>> {
        let mut identity = conn.data();
        if identity.id.is_empty() {
            identity.id = ClientId::from(Uuid::new_v4().to_string());
        }
        if self.config.debug {
            debug!(client = %identity, "connection opened");
        }

        // A hub without its global channel is a construction bug, not a
        // runtime condition.
        let global = self
            .get_channel(GLOBAL_CHANNEL_ID)
            .await
            .ok_or(HubError::GlobalChannelMissing)?;

        let client = match &self.config.client_factory {
            Some(factory) => factory(identity.clone(), conn),
            None => Arc::new(Client::new(identity.clone(), conn)),
        };
        client.mark_connected().await;

        {
            let mut inner = self.inner.write().await;
            inner.clients.insert(identity.id.clone(), client.clone());
        }

        let welcome = MessagePayload::with_content(
            message_types::CLIENT_CONNECTED,
            json!({
                "message": "Welcome to the server",
                "client": { "id": identity.id, "name": identity.name },
            }),
        );
        client.send(welcome, MessageOptions::default()).await?;

        let joined = client.join_channel(&global, true).await;
        if !joined.is_added() {
            warn!(client = %identity.id, reason = joined.reason(), "global join refused");
        }

        info!(client = %identity.id, "client connected");

        if let Some(hook) = &self.config.hooks.open {
            hook(client.clone()).await;
        }

        Ok(client)
    }

    /// Transport lifecycle: a text frame arrived
    ///
    /// The bare string `"ping"` is answered with a pong envelope; any other
    /// frame goes to the user `message` hook when one is set, else to the
    /// default echo + broadcast-all behavior.
    pub async fn on_message(&self, client_id: &str, raw: &str) -> HubResult<()> {
        let client = match self.get_client(client_id).await {
            Some(client) => client,
            None => {
                warn!(client = %client_id, "message from unknown client");
                return Ok(());
            }
        };

        if raw == "ping" {
            let pong = MessagePayload::with_content(
                message_types::PONG,
                json!({ "message": "pong" }),
            );
            let bytes =
                MessageBuilder::render(&pong, &MessageOptions::new().without_timestamp())?;
            if let Err(error) = client.write_raw(&bytes).await {
                warn!(client = %client_id, %error, "pong failed");
            }
            return Ok(());
        }

        if let Some(hook) = &self.config.hooks.message {
            hook(client, raw.to_string()).await;
            return Ok(());
        }

        let payload = MessagePayload::with_content(
            message_types::CLIENT_MESSAGE_RECEIVED,
            json!({ "message": raw }),
        );
        client.send(payload.clone(), MessageOptions::default()).await?;
        self.broadcast_all(payload).await;
        Ok(())
    }

    /// Transport lifecycle: a connection closed
    ///
    /// Standard WebSocket close codes (1000–1015) and application codes
    /// (4000–4999) pass through to the user `close` hook unchanged, which
    /// runs before the cleanup. The client is evacuated from every channel
    /// before it leaves the registry.
    pub async fn on_close(&self, client_id: &str, code: u16, reason: &str) {
        if self.config.debug {
            debug!(client = %client_id, code, reason, "connection closed");
        }

        let client = match self.get_client(client_id).await {
            Some(client) => client,
            None => return,
        };

        if let Some(hook) = &self.config.hooks.close {
            hook(client.clone(), code, reason.to_string()).await;
        }

        client.mark_disconnecting().await;

        // Evacuation is idempotent on non-member channels.
        for channel in self.channels().await {
            channel
                .remove_member(client_id, MemberOptions::silent())
                .await;
        }

        client.mark_disconnected().await;

        {
            let mut inner = self.inner.write().await;
            inner.clients.remove(client_id);
        }

        info!(client = %client_id, code, "client disconnected");
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn build_channel(config: &HubConfig, id: &str, name: &str, limit: usize) -> Arc<Channel> {
    match &config.channel_factory {
        Some(factory) => factory(id, name, limit),
        None => Arc::new(Channel::with_limit(id, name, limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_GLOBAL_CHANNEL_LIMIT;

    #[tokio::test]
    async fn bootstraps_global_channel() {
        let hub = Hub::new(HubConfig::default());
        let global = hub.get_channel(GLOBAL_CHANNEL_ID).await.unwrap();
        assert_eq!(global.limit(), DEFAULT_GLOBAL_CHANNEL_LIMIT);
        assert_eq!(hub.channel_count().await, 1);
    }

    #[tokio::test]
    async fn create_channel_is_idempotent() {
        let hub = Hub::new(HubConfig::default());
        let first = hub.create_channel("room", "Room", Some(2)).await;
        let second = hub.create_channel("room", "Room Again", Some(7)).await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.limit(), 2);
        assert_eq!(hub.channel_count().await, 2);
    }

    #[tokio::test]
    async fn channels_seed_replaces_bootstrap() {
        let lobby: Arc<Channel> = Arc::new(Channel::new("lobby", "Lobby"));
        let seed = HashMap::from([(lobby.id().clone(), lobby)]);
        let hub = Hub::new(HubConfig::new().with_channels_seed(seed));

        assert!(hub.get_channel("lobby").await.is_some());
        assert!(hub.get_channel(GLOBAL_CHANNEL_ID).await.is_none());
    }

    #[tokio::test]
    async fn channel_factory_builds_variants() {
        let config = HubConfig::new().with_channel_factory(|id, name, limit| {
            Arc::new(Channel::with_limit(id, format!("[{name}]"), limit))
        });
        let hub = Hub::new(config);

        let channel = hub.create_channel("room", "Room", None).await;
        assert_eq!(channel.name(), "[Room]");

        let global = hub.get_channel(GLOBAL_CHANNEL_ID).await.unwrap();
        assert_eq!(global.name(), "[Global]");
    }

    #[tokio::test]
    async fn missing_lookups_return_sentinels() {
        let hub = Hub::new(HubConfig::default());
        assert!(hub.get_channel("nope").await.is_none());
        assert!(hub.get_client("nope").await.is_none());
        assert!(matches!(
            hub.require_client("nope").await,
            Err(HubError::ClientNotFound(_))
        ));
    }

    #[tokio::test]
    async fn broadcast_requires_bound_server() {
        let hub = Hub::new(HubConfig::default());
        let result = hub.broadcast(GLOBAL_CHANNEL_ID, "hello").await;
        assert!(matches!(result, Err(HubError::TransportNotSet)));
    }

    #[tokio::test]
    async fn broadcast_on_unknown_channel_errors() {
        let hub = Hub::new(HubConfig::default());
        let result = hub.broadcast("nope", "hello").await;
        assert!(matches!(result, Err(HubError::ChannelNotFound(_))));
    }
}
