//! Connection ids and generated channel names.
//!
//! Ids are UUID v7 (time-ordered) so that log lines sort by connect time.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix for channel names generated by the relay.
const CHANNEL_NAME_PREFIX: &str = "ch_";

/// Unique identifier for one accepted socket (publisher or subscriber).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new random id.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7().simple()))
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Generate a fresh channel name for a publisher that did not pick one.
pub fn generate_channel_name() -> String {
    format!("{CHANNEL_NAME_PREFIX}{}", Uuid::now_v7().simple())
}
