//! # fanout-relay
//!
//! Standalone relay binary. Loads `~/.fanout/settings.json` (or `--settings`),
//! applies `FANOUT_*` environment overrides and then command-line flags,
//! installs logging and the Prometheus recorder, and serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fanout_core::logging::{LogFormat, init_subscriber};
use fanout_server::{FanoutServer, ServerConfig};
use fanout_settings::FanoutSettings;

/// Fan-out relay: publishers push envelopes, subscribers receive them.
#[derive(Parser, Debug)]
#[command(name = "fanout-relay", about = "WebSocket publisher/subscriber fan-out relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings file.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive, e.g. `info` or `fanout_server=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format: `compact` or `json`.
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Disable the `/metrics` endpoint.
    #[arg(long, default_value_t = false)]
    no_metrics: bool,
}

impl Cli {
    /// Flags win over file and environment values.
    fn apply(&self, settings: &mut FanoutSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }

    fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(fanout_settings::settings_path)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Settings first: the log level comes from them
    let path = cli.settings_path();
    let mut settings = fanout_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);

    init_subscriber(&settings.logging.level, settings.logging.format);
    tracing::debug!(path = %path.display(), "settings loaded");

    let config = ServerConfig::from_settings(&settings);
    let mut server = FanoutServer::new(config);
    if !cli.no_metrics {
        match fanout_server::metrics::install_recorder() {
            Ok(handle) => server = server.with_metrics(handle),
            Err(e) => tracing::warn!(error = %e, "metrics recorder not installed"),
        }
    }

    let (addr, handle) = server
        .listen()
        .await
        .with_context(|| format!("failed to bind {}", server.config().bind_addr()))?;
    tracing::info!(%addr, "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received");

    server.registry().close_all();
    server.shutdown().graceful_shutdown(vec![handle], None).await;

    tracing::info!("relay exited");
    Ok(())
}
