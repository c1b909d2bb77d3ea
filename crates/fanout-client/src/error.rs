//! Client error types.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors returned by [`crate::ClientConnection`] operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The socket could not be opened (network failure or HTTP refusal).
    #[error("failed to connect: {0}")]
    Connect(#[source] tungstenite::Error),
    /// [`crate::ClientConnection::start`] was called more than once.
    #[error("connection already started")]
    AlreadyStarted,
    /// The connection was closed before it was started.
    #[error("connection closed")]
    Closed,
}

impl ClientError {
    /// HTTP status of a refused handshake, if that is what failed.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Connect(tungstenite::Error::Http(response)) => Some(response.status().as_u16()),
            _ => None,
        }
    }
}

/// Failure reported by an event handler.
///
/// Handler failures never stop the connection; they are logged and counted.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
