//! Events raised to client handlers.

use std::fmt;

/// Why a client connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The socket closed or failed.
    TransportClosed,
    /// The relay sent a `disconnectNotice` for the channel.
    ChannelDisconnected,
    /// [`crate::ClientConnection::close`] was called or the connection dropped.
    ClosedByClient,
}

impl CloseReason {
    /// Human-readable reason string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransportClosed => "Socket closed",
            Self::ChannelDisconnected => "Channel has been disconnected",
            Self::ClosedByClient => "Closed by client",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened on a client connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// A payload published on the channel.
    Payload {
        /// Publisher-defined identifier.
        identifier: String,
        /// Opaque payload text.
        payload: String,
    },
    /// The connection ended. Raised exactly once, always last.
    Closed {
        /// Why it ended.
        reason: CloseReason,
    },
}
