//! Error types for carelink-core

use thiserror::Error;

/// Top-level error type for carelink-core
#[derive(Error, Debug)]
pub enum CarelinkError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Errors from the session-handle store
///
/// These never reach a client: the store recovers locally by treating a
/// failed read as an absent record and retrying writes on the next save.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(#[source] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors from the upstream live-session collaborator
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Failed to connect to live API: {0}")]
    ConnectFailed(String),

    #[error("Live session closed: {reason}")]
    SessionClosed { reason: String },

    #[error("Failed to send to live session: {0}")]
    SendFailed(String),
}

/// Errors fatal to a single bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Timed out waiting for setup frame")]
    HandshakeTimeout,

    #[error("Invalid setup frame: {0}")]
    InvalidSetup(String),

    #[error("Client disconnected before setup")]
    ClientGone,

    #[error("Client transport error: {0}")]
    Transport(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Request-validation errors for notification dispatch
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Notification text is required")]
    EmptyText,
}

/// Errors from the audio-generation collaborator
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio generation failed: {0}")]
    Generation(String),
}

/// Errors parsing an inbound client frame
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Unrecognized client frame")]
    UnknownFrame,
}

/// Per-connection send failures during broadcast
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Connection closed")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),
}

impl SinkError {
    /// Whether the transport reported the connection as permanently closed
    pub fn is_closed(&self) -> bool {
        matches!(self, SinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_error_handshake_timeout_displays_correctly() {
        let error = BridgeError::HandshakeTimeout;
        assert!(error.to_string().contains("setup frame"));
    }

    #[test]
    fn upstream_error_session_closed_displays_reason() {
        let error = UpstreamError::SessionClosed {
            reason: "quota exceeded".to_string(),
        };
        assert!(error.to_string().contains("quota exceeded"));
    }

    #[test]
    fn dispatch_error_empty_text_displays_correctly() {
        let error = DispatchError::EmptyText;
        assert!(error.to_string().contains("text is required"));
    }

    #[test]
    fn sink_error_is_closed_classification() {
        assert!(SinkError::Closed.is_closed());
        assert!(!SinkError::SendFailed("buffer full".to_string()).is_closed());
    }

    #[test]
    fn bridge_error_converts_from_upstream_error() {
        let upstream = UpstreamError::ConnectFailed("dns failure".to_string());
        let bridge: BridgeError = upstream.into();
        assert!(matches!(bridge, BridgeError::Upstream(_)));
    }

    #[test]
    fn carelink_error_converts_from_bridge_error() {
        let error: CarelinkError = BridgeError::HandshakeTimeout.into();
        assert!(matches!(error, CarelinkError::Bridge(_)));
    }
}
