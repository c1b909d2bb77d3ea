//! Server configuration.

use std::time::Duration;

use fanout_settings::FanoutSettings;

use crate::sweeper::SweepPolicy;
use crate::websocket::connection::SocketOptions;

/// Runtime configuration for [`crate::FanoutServer`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Socket read buffer size in bytes.
    pub receive_buffer_size: usize,
    /// Largest accepted inbound message in bytes.
    pub max_message_size: usize,
    /// Per-socket queueing, write timeout and keepalive.
    pub socket: SocketOptions,
    /// Staleness sweep timing.
    pub sweep: SweepPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            receive_buffer_size: 10 * 1024,
            max_message_size: 1024 * 1024,
            socket: SocketOptions::default(),
            sweep: SweepPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Map loaded settings onto the runtime configuration.
    pub fn from_settings(settings: &FanoutSettings) -> Self {
        let relay = &settings.relay;
        let sweeper = &settings.sweeper;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            receive_buffer_size: relay.receive_buffer_size,
            max_message_size: relay.max_message_size,
            socket: SocketOptions {
                queue_capacity: relay.subscriber_queue_capacity,
                send_timeout: Duration::from_millis(relay.send_timeout_ms),
                ping_interval: Duration::from_secs(relay.ping_interval_secs),
            },
            sweep: SweepPolicy {
                interval: Duration::from_secs(sweeper.interval_secs),
                inactivity_timeout: Duration::from_secs(sweeper.inactivity_timeout_secs),
                abandoned_timeout: Duration::from_secs(sweeper.abandoned_timeout_secs),
            },
        }
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
