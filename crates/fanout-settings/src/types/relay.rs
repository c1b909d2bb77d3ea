//! Relay and sweeper tuning.

use serde::{Deserialize, Serialize};

/// Per-socket buffering, timeouts and keepalive.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Socket read buffer size in bytes.
    pub receive_buffer_size: usize,
    /// Largest accepted inbound message in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per socket before frames are dropped.
    pub subscriber_queue_capacity: usize,
    /// Upper bound on a single socket write, in milliseconds.
    pub send_timeout_ms: u64,
    /// Interval between keepalive pings, in seconds.
    pub ping_interval_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            receive_buffer_size: 10 * 1024,
            max_message_size: 1024 * 1024,
            subscriber_queue_capacity: 256,
            send_timeout_ms: 10_000,
            ping_interval_secs: 30,
        }
    }
}

/// Channel eviction policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SweeperSettings {
    /// Seconds between sweep cycles.
    pub interval_secs: u64,
    /// A channel with no publisher message for this long is evicted.
    pub inactivity_timeout_secs: u64,
    /// A disconnected channel not reclaimed for this long is evicted.
    pub abandoned_timeout_secs: u64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            inactivity_timeout_secs: 90,
            abandoned_timeout_secs: 120,
        }
    }
}
