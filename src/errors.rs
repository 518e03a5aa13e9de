//! Hub error types
//!
//! Expected failures (duplicate join, full channel) are expressed as result
//! variants on the operations themselves; this enum covers configuration and
//! programmer errors plus the failures that cross module boundaries.

use crate::transport::TransportError;
use crate::types::{ChannelId, ClientId};
use thiserror::Error;

/// Result type for hub operations
pub type HubResult<T> = Result<T, HubError>;

/// Hub errors
#[derive(Error, Debug)]
pub enum HubError {
    #[error("transport server not bound; call set_transport_server before broadcasting")]
    TransportNotSet,

    #[error("channel not found: {0}")]
    ChannelNotFound(ChannelId),

    #[error("client not found: {0}")]
    ClientNotFound(ClientId),

    #[error("global channel missing from hub registry")]
    GlobalChannelMissing,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HubError {
    pub fn channel_not_found<T: Into<ChannelId>>(id: T) -> Self {
        HubError::ChannelNotFound(id.into())
    }

    pub fn client_not_found<T: Into<ClientId>>(id: T) -> Self {
        HubError::ClientNotFound(id.into())
    }

    /// Whether this error reports the peer connection as gone
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, HubError::Transport(e) if e.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = HubError::channel_not_found("lobby");
        assert_eq!(err.to_string(), "channel not found: lobby");

        let err = HubError::TransportNotSet;
        assert!(err.to_string().contains("set_transport_server"));
    }

    #[test]
    fn closed_detection_wraps_transport() {
        let err = HubError::from(TransportError::Closed);
        assert!(err.is_connection_closed());

        let err = HubError::from(TransportError::io("broken pipe"));
        assert!(!err.is_connection_closed());
    }
}
