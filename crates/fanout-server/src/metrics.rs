//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if a global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants shared by the registry, channel loops and sweeper.

/// Channels registered (counter, labels: naming).
pub const CHANNELS_CREATED_TOTAL: &str = "fanout_channels_created_total";
/// Channels evicted by the sweeper (counter, labels: reason).
pub const CHANNELS_EVICTED_TOTAL: &str = "fanout_channels_evicted_total";
/// Channels currently registered (gauge).
pub const CHANNELS_ACTIVE: &str = "fanout_channels_active";
/// Publisher reconnects onto an existing channel (counter).
pub const PUBLISHER_RECONNECTS_TOTAL: &str = "fanout_publisher_reconnects_total";
/// Attached subscriber sockets (gauge).
pub const SUBSCRIBERS_ACTIVE: &str = "fanout_subscribers_active";
/// Envelopes received from publishers and fanned out (counter).
pub const ENVELOPES_RELAYED_TOTAL: &str = "fanout_envelopes_relayed_total";
/// Publisher frames dropped as malformed (counter).
pub const ENVELOPES_REJECTED_TOTAL: &str = "fanout_envelopes_rejected_total";
/// Per-subscriber delivery failures (counter, labels: code).
pub const DELIVERY_FAILURES_TOTAL: &str = "fanout_delivery_failures_total";
/// Upgrade requests refused before the handshake (counter, labels: code).
pub const UPGRADES_REJECTED_TOTAL: &str = "fanout_upgrades_rejected_total";
/// Completed sweep cycles (counter).
pub const SWEEP_CYCLES_TOTAL: &str = "fanout_sweep_cycles_total";
/// Sweep cycles that panicked (counter).
pub const SWEEP_PANICS_TOTAL: &str = "fanout_sweep_panics_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_render() {
        // no global install, tests share the process
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            CHANNELS_CREATED_TOTAL,
            CHANNELS_EVICTED_TOTAL,
            CHANNELS_ACTIVE,
            PUBLISHER_RECONNECTS_TOTAL,
            SUBSCRIBERS_ACTIVE,
            ENVELOPES_RELAYED_TOTAL,
            ENVELOPES_REJECTED_TOTAL,
            DELIVERY_FAILURES_TOTAL,
            UPGRADES_REJECTED_TOTAL,
            SWEEP_CYCLES_TOTAL,
            SWEEP_PANICS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
            assert!(name.starts_with("fanout_"));
        }
    }
}
