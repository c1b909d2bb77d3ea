//! # fanout-server
//!
//! Axum HTTP + `WebSocket` relay that fans one publisher's envelopes out to
//! many subscribers.
//!
//! - Channel registry keyed by name, one publisher slot per channel
//! - Per-socket bounded outbound queues drained by a writer task with pings
//! - Publisher receive/fan-out loop and idle subscriber sessions
//! - Staleness sweeper evicting inactive and abandoned channels
//! - Health and Prometheus endpoints, graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod channel;
pub mod config;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod subscriber;
pub mod sweeper;
pub mod websocket;

pub use channel::{Channel, ChannelState, FanOut};
pub use config::ServerConfig;
pub use registry::ChannelRegistry;
pub use server::{AppState, FanoutServer};
pub use shutdown::ShutdownCoordinator;
pub use subscriber::SubscriberSession;
pub use sweeper::{SweepPolicy, SweepReport, Sweeper};
pub use websocket::connection::{SocketHandle, SocketOptions};
