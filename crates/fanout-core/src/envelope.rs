//! Wire envelope exchanged between publishers, the relay and subscribers.
//!
//! Envelopes are JSON objects internally tagged by `type`:
//!
//! ```json
//! {"type":"payloadDelivery","identifier":"C1","payload":"{}"}
//! {"type":"disconnectNotice"}
//! {"type":"channelAssigned","name":"ch_0192..."}
//! ```
//!
//! Any other `type` decodes to [`Envelope::Unknown`] so that newer peers can
//! add kinds without breaking older receivers.

use serde::{Deserialize, Serialize};

/// A single unit of the relay protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Envelope {
    /// Opaque payload addressed by an identifier, fanned out to subscribers.
    #[serde(rename_all = "camelCase")]
    PayloadDelivery {
        /// Consumer-defined identifier of the payload.
        identifier: String,
        /// Opaque payload body (usually JSON text).
        payload: String,
    },
    /// The channel is going away; receivers should treat the connection as closed.
    DisconnectNotice,
    /// Sent by the relay to a publisher after a server-named registration.
    ChannelAssigned {
        /// The name under which the channel was registered.
        name: String,
    },
    /// Any tag this build does not know about.
    #[serde(other)]
    Unknown,
}

impl Envelope {
    /// Build a payload delivery envelope.
    pub fn payload(identifier: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::PayloadDelivery {
            identifier: identifier.into(),
            payload: payload.into(),
        }
    }

    /// Decode an envelope from a text frame.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode the envelope as a text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Wire tag of this envelope, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PayloadDelivery { .. } => "payloadDelivery",
            Self::DisconnectNotice => "disconnectNotice",
            Self::ChannelAssigned { .. } => "channelAssigned",
            Self::Unknown => "unknown",
        }
    }
}
