//! # sockethub
//!
//! A connection-oriented WebSocket pub/sub hub: connected clients, named
//! channels with bounded membership, structured message envelopes, and a
//! broadcast fan-out engine with both a topic-publish fast path and a
//! per-recipient filtered path.
//!
//! The crate owns the coordination logic only. Socket I/O and the HTTP
//! upgrade live behind the [`Transport`] trait: every connection hands the
//! hub an object that can write bytes and manage pub/sub topics, and the
//! same trait doubles as the shared publish server.
//!
//! ## Architecture
//!
//! - [`message`] - envelope construction pipeline; wire format vs.
//!   processing options
//! - [`client`] - per-connection adapter with the send-state gate
//! - [`channel`] - membership authority and fan-out
//! - [`hub`] - registries, lifecycle handlers, global channel bootstrap
//! - [`hooks`] - user callbacks composed with the default handlers
//! - [`transport`] - the consumed I/O contract
//!
//! ## Quick start
//!
//! ```no_run
//! use sockethub::{Hub, HubConfig};
//! use std::sync::Arc;
//!
//! # async fn example(server: Arc<dyn sockethub::Transport>, conn: Arc<dyn sockethub::Transport>) -> sockethub::HubResult<()> {
//! let hub = Arc::new(Hub::new(HubConfig::default()));
//! hub.set_transport_server(server).await;
//!
//! // Driven by the transport layer:
//! let client = hub.on_open(conn).await?;
//! hub.on_message(client.id().as_str(), "hello").await?;
//! hub.on_close(client.id().as_str(), 1000, "bye").await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod errors;
pub mod hooks;
pub mod hub;
pub mod logging;
pub mod message;
pub mod transport;
pub mod types;

// Core hub API
pub use hub::{Hub, HubStats, GLOBAL_CHANNEL_ID};
pub use config::{ChannelFactory, ClientFactory, HubConfig, DEFAULT_GLOBAL_CHANNEL_LIMIT};
pub use errors::{HubError, HubResult};

// Entities
pub use channel::{
    AddMemberResult, BroadcastResult, Channel, ChannelStats, MemberOptions, DEFAULT_MEMBER_LIMIT,
};
pub use client::{Client, ConnectionInfo};

// Messaging
pub use message::{
    message_types, Envelope, MessageBuilder, MessageOptions, MessagePayload, MetadataSelection,
    Transform,
};

// Transport contract
pub use transport::{Transport, TransportError, TransportResult};

// Hooks and shared types
pub use hooks::{CloseHook, InterfaceHooks, MessageHook, OpenHook};
pub use logging::{init_logging, LoggingConfig};
pub use types::{BoxFuture, ChannelId, ClientId, ClientState, EntityIdentity};
