//! Transport abstraction consumed by the hub
//!
//! The hub never touches sockets. Each connection hands it an object that
//! can write bytes to the peer and manage pub/sub topic membership; the
//! same trait doubles as the shared publish server bound via
//! [`Hub::set_transport_server`](crate::hub::Hub::set_transport_server).

use crate::types::EntityIdentity;
use async_trait::async_trait;
use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by a transport implementation
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying connection is gone. A send failing with this variant
    /// transitions the owning client to `Disconnected`.
    #[error("connection closed")]
    Closed,

    #[error("i/o failure: {0}")]
    Io(String),

    #[error("send queue full")]
    Backpressure,

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn io<T: Into<String>>(message: T) -> Self {
        TransportError::Io(message.into())
    }

    pub fn other<T: Into<String>>(message: T) -> Self {
        TransportError::Other(message.into())
    }

    /// Whether the error indicates the connection is closed for good
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}

/// Per-connection byte sink plus pub/sub topic management
///
/// Implementations are expected to deliver topic publishes to each
/// subscriber in publish order; the hub adds no ordering of its own and
/// guarantees nothing across topics.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write bytes to this connection
    async fn send(&self, bytes: &[u8]) -> TransportResult<()>;

    /// Join a pub/sub topic
    async fn subscribe(&self, topic: &str) -> TransportResult<()>;

    /// Leave a pub/sub topic
    async fn unsubscribe(&self, topic: &str) -> TransportResult<()>;

    /// Fan out bytes to every subscriber of `topic`
    async fn publish(&self, topic: &str, bytes: &[u8]) -> TransportResult<()>;

    /// Close the connection
    async fn close(&self, code: Option<u16>, reason: Option<&str>) -> TransportResult<()>;

    /// Identity assigned at upgrade time
    fn data(&self) -> EntityIdentity;
}
