//! Relay error taxonomy.

use thiserror::Error;

/// Errors raised by registry, channel and socket operations.
///
/// Only [`RelayError::NameNotFound`] and [`RelayError::DuplicateName`] are
/// meant to reach a remote peer (as an HTTP rejection). Everything else is
/// contained by the loop that owns the socket.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Reconnect or attach against a channel name that is not registered.
    #[error("channel not found: {name}")]
    NameNotFound {
        /// The requested channel name.
        name: String,
    },
    /// Registration under a name that is already taken.
    #[error("channel already exists: {name}")]
    DuplicateName {
        /// The requested channel name.
        name: String,
    },
    /// The socket is closed or its writer has gone away.
    #[error("transport closed")]
    TransportClosed,
    /// The socket's outbound queue is full; the frame was dropped.
    #[error("outbound queue full")]
    QueueFull,
    /// A frame could not be decoded or encoded as an envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[from] serde_json::Error),
}

impl RelayError {
    /// Whether this error is the caller's fault and should be reported back.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::NameNotFound { .. } | Self::DuplicateName { .. })
    }

    /// Stable machine-readable code, used as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NameNotFound { .. } => "NAME_NOT_FOUND",
            Self::DuplicateName { .. } => "DUPLICATE_NAME",
            Self::TransportClosed => "TRANSPORT_CLOSED",
            Self::QueueFull => "QUEUE_FULL",
            Self::InvalidEnvelope(_) => "INVALID_ENVELOPE",
        }
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
