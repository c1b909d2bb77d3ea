//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file
//! format. Each type implements [`Default`] with production default values,
//! and `#[serde(default)]` allows partial JSON: missing fields get their
//! default value during deserialization.

mod relay;
mod server;

pub use relay::*;
pub use server::*;

use fanout_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the fanout relay.
///
/// Loaded from `~/.fanout/settings.json` with defaults applied for
/// missing fields. Environment variables can override specific values.
///
/// # JSON Format
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "sweeper": { "inactivityTimeoutSecs": 60 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FanoutSettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Per-socket relay tuning.
    pub relay: RelaySettings,
    /// Staleness sweep policy.
    pub sweeper: SweeperSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl FanoutSettings {
    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        let zero_checks = [
            ("relay.receiveBufferSize", self.relay.receive_buffer_size == 0),
            ("relay.maxMessageSize", self.relay.max_message_size == 0),
            (
                "relay.subscriberQueueCapacity",
                self.relay.subscriber_queue_capacity == 0,
            ),
            ("relay.sendTimeoutMs", self.relay.send_timeout_ms == 0),
            ("relay.pingIntervalSecs", self.relay.ping_interval_secs == 0),
            ("sweeper.intervalSecs", self.sweeper.interval_secs == 0),
        ];
        if let Some((key, _)) = zero_checks.iter().find(|(_, is_zero)| *is_zero) {
            return Err(SettingsError::InvalidValue(format!("{key} must be > 0")));
        }
        if self.relay.max_message_size < self.relay.receive_buffer_size {
            return Err(SettingsError::InvalidValue(
                "relay.maxMessageSize must be >= relay.receiveBufferSize".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (`RUST_LOG` wins when set).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
