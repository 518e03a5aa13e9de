//! Client connection adapter
//!
//! One `Client` per live connection. It owns the connection's transport
//! handle, tracks which channels the connection has joined, and gates every
//! outbound write on the connection state machine.

use crate::channel::{AddMemberResult, Channel, MemberOptions};
use crate::errors::HubResult;
use crate::message::{message_types, MessageBuilder, MessageOptions, MessagePayload};
use crate::transport::{Transport, TransportError};
use crate::types::{ChannelId, ClientState, EntityIdentity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A connected endpoint with identity, state and joined channels
///
/// Channel membership is coordinated two-way: the channel holds the strong
/// reference to the client, the client holds a weak back-reference to the
/// channel. Both sides are kept in sync by `Channel::add_member` /
/// `Channel::remove_member`; the client-side tracking methods are
/// crate-internal for that reason.
pub struct Client {
    identity: EntityIdentity,
    transport: Arc<dyn Transport>,
    inner: RwLock<ClientInner>,
}

struct ClientInner {
    channels: HashMap<ChannelId, Weak<Channel>>,
    state: ClientState,
    connected_at: Option<DateTime<Utc>>,
    disconnected_at: Option<DateTime<Utc>>,
}

/// Point-in-time snapshot of a connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub client: EntityIdentity,
    pub state: ClientState,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Milliseconds since the connection reached `Connected`
    pub uptime_ms: Option<i64>,
    pub channel_count: usize,
}

impl Client {
    pub fn new(identity: EntityIdentity, transport: Arc<dyn Transport>) -> Self {
        Self {
            identity,
            transport,
            inner: RwLock::new(ClientInner {
                channels: HashMap::new(),
                state: ClientState::Connecting,
                connected_at: None,
                disconnected_at: None,
            }),
        }
    }

    /// Identity of this connection
    pub fn whoami(&self) -> EntityIdentity {
        self.identity.clone()
    }

    pub fn id(&self) -> &crate::types::ClientId {
        &self.identity.id
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub async fn state(&self) -> ClientState {
        self.inner.read().await.state
    }

    /// Whether outbound sends are currently admissible
    pub async fn can_receive(&self) -> bool {
        self.inner.read().await.state.can_receive()
    }

    pub async fn mark_connected(&self) {
        let mut inner = self.inner.write().await;
        if inner.state.advance(ClientState::Connected) {
            inner.connected_at = Some(Utc::now());
        } else {
            debug!(client = %self.identity.id, state = %inner.state, "ignoring backward transition to connected");
        }
    }

    pub async fn mark_disconnecting(&self) {
        let mut inner = self.inner.write().await;
        if !inner.state.advance(ClientState::Disconnecting) {
            debug!(client = %self.identity.id, state = %inner.state, "ignoring backward transition to disconnecting");
        }
    }

    pub async fn mark_disconnected(&self) {
        let mut inner = self.inner.write().await;
        if inner.state.advance(ClientState::Disconnected) {
            inner.disconnected_at = Some(Utc::now());
        }
    }

    /// Build and send an envelope to this connection
    ///
    /// The envelope is attributed to this client. Sends in an inadmissible
    /// state are dropped with a warning; transport failures are confined
    /// here, and a closed transport transitions the client to
    /// `Disconnected`.
    pub async fn send(
        &self,
        payload: impl Into<MessagePayload>,
        options: MessageOptions,
    ) -> HubResult<()> {
        let payload = payload.into();
        if !self.can_receive().await {
            warn!(
                client = %self.identity.id,
                kind = %payload.kind,
                "dropping send to client in inadmissible state"
            );
            return Ok(());
        }

        let mut options = options;
        options.client = Some(self.whoami());
        let bytes = MessageBuilder::render(&payload, &options)?;
        self.deliver(&bytes).await;
        Ok(())
    }

    /// Send a plain text message (`type = "message"`)
    pub async fn send_text<T: Into<String>>(&self, text: T) -> HubResult<()> {
        self.send(text.into(), MessageOptions::default()).await
    }

    /// Join a channel; delegates membership authority to the channel
    pub async fn join_channel(
        self: &Arc<Self>,
        channel: &Arc<Channel>,
        notify: bool,
    ) -> AddMemberResult {
        if self.tracks(channel.id().as_str()).await {
            return AddMemberResult::AlreadyMember;
        }
        channel
            .add_member(self, MemberOptions::default().notify(notify))
            .await
    }

    /// Leave a channel; a no-op when this client is not a member
    pub async fn leave_channel(self: &Arc<Self>, channel: &Arc<Channel>, notify: bool) {
        if !self.tracks(channel.id().as_str()).await {
            return;
        }
        channel
            .remove_member(
                self.identity.id.as_str(),
                MemberOptions::default().notify(notify),
            )
            .await;
    }

    /// Join several channels, then send one aggregate notification
    pub async fn join_channels(
        self: &Arc<Self>,
        channels: &[Arc<Channel>],
        notify: bool,
    ) -> Vec<AddMemberResult> {
        let mut results = Vec::with_capacity(channels.len());
        let mut joined = Vec::new();

        for channel in channels {
            let result = self.join_channel(channel, false).await;
            if result.is_added() {
                joined.push(channel.id().to_string());
            }
            results.push(result);
        }

        if notify && !joined.is_empty() {
            let payload = MessagePayload::with_content(
                message_types::CLIENT_JOIN_CHANNELS,
                json!({
                    "message": format!("Joined {} channels", joined.len()),
                    "channels": joined,
                }),
            );
            if let Err(error) = self.send(payload, MessageOptions::default()).await {
                warn!(client = %self.identity.id, %error, "failed to send join notification");
            }
        }

        results
    }

    /// Leave the given channels, or every joined channel when `None`
    pub async fn leave_channels(
        self: &Arc<Self>,
        channels: Option<&[Arc<Channel>]>,
        notify: bool,
    ) {
        let targets: Vec<Arc<Channel>> = match channels {
            Some(list) => list.to_vec(),
            None => self.channels().await,
        };

        let mut left = Vec::new();
        for channel in &targets {
            if self.tracks(channel.id().as_str()).await {
                if channel
                    .remove_member(self.identity.id.as_str(), MemberOptions::silent())
                    .await
                    .is_some()
                {
                    left.push(channel.id().to_string());
                }
            }
        }

        if notify && !left.is_empty() {
            let payload = MessagePayload::with_content(
                message_types::CLIENT_LEAVE_CHANNELS,
                json!({
                    "message": format!("Left {} channels", left.len()),
                    "channels": left,
                }),
            );
            if let Err(error) = self.send(payload, MessageOptions::default()).await {
                warn!(client = %self.identity.id, %error, "failed to send leave notification");
            }
        }
    }

    /// Channels this client is currently a member of
    pub async fn channels(&self) -> Vec<Arc<Channel>> {
        let inner = self.inner.read().await;
        inner
            .channels
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub async fn channel_ids(&self) -> Vec<ChannelId> {
        let inner = self.inner.read().await;
        inner.channels.keys().cloned().collect()
    }

    pub async fn channel_count(&self) -> usize {
        self.inner.read().await.channels.len()
    }

    /// Snapshot of the connection with uptime and channel count
    pub async fn connection_info(&self) -> ConnectionInfo {
        let inner = self.inner.read().await;
        let uptime_ms = inner.connected_at.map(|connected_at| {
            let end = inner.disconnected_at.unwrap_or_else(Utc::now);
            (end - connected_at).num_milliseconds()
        });

        ConnectionInfo {
            client: self.identity.clone(),
            state: inner.state,
            connected_at: inner.connected_at,
            disconnected_at: inner.disconnected_at,
            uptime_ms,
            channel_count: inner.channels.len(),
        }
    }

    // Coordination helpers below are called by Channel during join/leave.
    // Keeping them crate-internal preserves the two-way membership
    // invariant: member sets only change through the channel.

    pub(crate) async fn track_channel(&self, channel: &Arc<Channel>) {
        let mut inner = self.inner.write().await;
        inner
            .channels
            .insert(channel.id().clone(), Arc::downgrade(channel));
    }

    pub(crate) async fn untrack_channel(&self, channel_id: &str) {
        let mut inner = self.inner.write().await;
        inner.channels.remove(channel_id);
    }

    pub(crate) async fn tracks(&self, channel_id: &str) -> bool {
        self.inner.read().await.channels.contains_key(channel_id)
    }

    pub(crate) async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.transport.subscribe(topic).await
    }

    pub(crate) async fn unsubscribe(&self, topic: &str) {
        if let Err(error) = self.transport.unsubscribe(topic).await {
            warn!(client = %self.identity.id, topic, %error, "unsubscribe failed");
        }
    }

    /// Write pre-serialized bytes to this connection, state-gated
    ///
    /// Returns `Ok(true)` when delivered, `Ok(false)` when dropped by the
    /// state gate.
    pub(crate) async fn write_raw(&self, bytes: &[u8]) -> Result<bool, TransportError> {
        if !self.can_receive().await {
            debug!(client = %self.identity.id, "skipping raw write to client in inadmissible state");
            return Ok(false);
        }
        match self.transport.send(bytes).await {
            Ok(()) => Ok(true),
            Err(error) => {
                if error.is_closed() {
                    self.mark_disconnected().await;
                }
                Err(error)
            }
        }
    }

    async fn deliver(&self, bytes: &[u8]) {
        if let Err(error) = self.transport.send(bytes).await {
            if error.is_closed() {
                warn!(client = %self.identity.id, "transport closed; marking client disconnected");
                self.mark_disconnected().await;
            } else {
                warn!(client = %self.identity.id, %error, "send failed");
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingTransport {
        sends: AtomicUsize,
        sent: Mutex<Vec<Vec<u8>>>,
        fail_with: Mutex<Option<TransportError>>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, bytes: &[u8]) -> TransportResult<()> {
            if let Some(error) = self.fail_with.lock().unwrap().take() {
                return Err(error);
            }
            self.sends.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        async fn subscribe(&self, _topic: &str) -> TransportResult<()> {
            Ok(())
        }

        async fn unsubscribe(&self, _topic: &str) -> TransportResult<()> {
            Ok(())
        }

        async fn publish(&self, _topic: &str, _bytes: &[u8]) -> TransportResult<()> {
            Ok(())
        }

        async fn close(&self, _code: Option<u16>, _reason: Option<&str>) -> TransportResult<()> {
            Ok(())
        }

        fn data(&self) -> EntityIdentity {
            EntityIdentity::new("t1", "Transport")
        }
    }

    fn client_with_transport() -> (Arc<Client>, Arc<CountingTransport>) {
        let transport = Arc::new(CountingTransport::default());
        let client = Arc::new(Client::new(
            EntityIdentity::new("u1", "A"),
            transport.clone(),
        ));
        (client, transport)
    }

    #[tokio::test]
    async fn send_is_dropped_before_connected() {
        let (client, transport) = client_with_transport();

        client.send("hello", MessageOptions::default()).await.unwrap();
        assert_eq!(transport.sends.load(Ordering::SeqCst), 0);

        client.mark_connected().await;
        client.send("hello", MessageOptions::default()).await.unwrap();
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_is_dropped_after_disconnect() {
        let (client, transport) = client_with_transport();
        client.mark_connected().await;
        client.mark_disconnected().await;

        client.send("hello", MessageOptions::default()).await.unwrap();
        assert_eq!(transport.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disconnecting_client_still_receives() {
        let (client, transport) = client_with_transport();
        client.mark_connected().await;
        client.mark_disconnecting().await;

        client.send("bye", MessageOptions::default()).await.unwrap();
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_transport_marks_client_disconnected() {
        let (client, transport) = client_with_transport();
        client.mark_connected().await;
        *transport.fail_with.lock().unwrap() = Some(TransportError::Closed);

        client.send("hello", MessageOptions::default()).await.unwrap();
        assert_eq!(client.state().await, ClientState::Disconnected);

        // Subsequent sends no longer reach the transport
        client.send("again", MessageOptions::default()).await.unwrap();
        assert_eq!(transport.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_closed_errors_are_swallowed() {
        let (client, transport) = client_with_transport();
        client.mark_connected().await;
        *transport.fail_with.lock().unwrap() = Some(TransportError::io("flaky"));

        client.send("hello", MessageOptions::default()).await.unwrap();
        assert_eq!(client.state().await, ClientState::Connected);
    }

    #[tokio::test]
    async fn sends_are_attributed_to_the_sender() {
        let (client, transport) = client_with_transport();
        client.mark_connected().await;
        client.send("hi", MessageOptions::default()).await.unwrap();

        let sent = transport.sent.lock().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&sent[0]).unwrap();
        assert_eq!(value["client"]["id"], "u1");
        assert_eq!(value["client"]["name"], "A");
    }

    #[tokio::test]
    async fn connection_info_reports_uptime_and_channels() {
        let (client, _transport) = client_with_transport();
        let info = client.connection_info().await;
        assert_eq!(info.state, ClientState::Connecting);
        assert!(info.uptime_ms.is_none());

        client.mark_connected().await;
        let info = client.connection_info().await;
        assert_eq!(info.state, ClientState::Connected);
        assert!(info.uptime_ms.is_some());
        assert_eq!(info.channel_count, 0);
    }
}
