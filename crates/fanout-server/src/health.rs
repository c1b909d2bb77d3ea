//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered channels.
    pub channels: usize,
    /// Open sockets (publishers plus subscribers).
    pub connections: usize,
    /// Channels with a live publisher.
    pub publishers: usize,
    /// Attached subscriber sockets.
    pub subscribers: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    channels: usize,
    publishers: usize,
    subscribers: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        channels,
        connections: publishers + subscribers,
        publishers,
        subscribers,
    }
}
