//! `FanoutServer`: Axum HTTP + `WebSocket` relay.
//!
//! Routes:
//! - `GET /publish` registers a publisher under a generated name and sends it
//!   a `channelAssigned` envelope
//! - `GET /publish?name=<name>` registers under `name` (409 if taken)
//! - `GET /publish/{name}` reconnects the publisher of `name` (400 if unknown)
//! - `GET /subscribe/{name}` attaches a subscriber (400 if unknown)
//! - `GET /health`, `GET /metrics`
//!
//! Name checks happen before the handshake so unknown or taken names are
//! refused with a plain HTTP status.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{OnFailedUpgrade, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use fanout_core::{Envelope, RelayError};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::channel::run_publisher;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::UPGRADES_REJECTED_TOTAL;
use crate::registry::ChannelRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::sweeper::Sweeper;
use crate::websocket::connection::SocketHandle;
use crate::websocket::open_socket;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Channel table.
    pub registry: Arc<ChannelRegistry>,
    /// Runtime configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator; socket close tokens are its children.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct FanoutServer {
    config: Arc<ServerConfig>,
    registry: Arc<ChannelRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl FanoutServer {
    /// Create a server with an empty registry.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(ChannelRegistry::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Use an externally owned registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ChannelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/publish", get(publish_handler))
            .route("/publish/{name}", get(reconnect_handler))
            .route("/subscribe/{name}", get(subscribe_handler))
            .route("/subscribe/{name}/", get(subscribe_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// A sweeper over this server's registry with the configured policy.
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(Arc::clone(&self.registry), self.config.sweep.clone())
    }

    /// Bind, start the sweeper and serve until shutdown.
    ///
    /// Returns the bound address and a handle that completes once the
    /// listener and the sweeper have stopped.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let token = self.shutdown.token();
        let sweeper = self.sweeper().spawn(token.clone());
        let router = self.router();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
            let _ = sweeper.await;
            info!("server stopped");
        });

        info!(%addr, "fanout relay listening");
        Ok((addr, handle))
    }

    /// The channel registry.
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[derive(Debug, Default, Deserialize)]
struct PublishParams {
    name: Option<String>,
}

type Upgrade = Result<WebSocketUpgrade, WebSocketUpgradeRejection>;

/// GET /publish[?name=]
async fn publish_handler(
    State(state): State<AppState>,
    Query(params): Query<PublishParams>,
    ws: Upgrade,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return reject_upgrade(&rejection),
    };

    match params.name.filter(|name| !name.is_empty()) {
        Some(name) => {
            if state.registry.contains(&name) {
                return refuse(&RelayError::DuplicateName { name });
            }
            configure(ws, &state.config)
                .on_upgrade(move |socket| accept_named_publisher(socket, state, name))
        }
        None => configure(ws, &state.config)
            .on_upgrade(move |socket| accept_generated_publisher(socket, state)),
    }
}

/// GET /publish/{name}
async fn reconnect_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ws: Upgrade,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return reject_upgrade(&rejection),
    };
    if !state.registry.contains(&name) {
        return refuse(&RelayError::NameNotFound { name });
    }
    configure(ws, &state.config).on_upgrade(move |socket| accept_reconnect(socket, state, name))
}

/// GET /subscribe/{name}
async fn subscribe_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ws: Upgrade,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return reject_upgrade(&rejection),
    };
    let name = name.trim_end_matches('/').to_owned();
    if !state.registry.contains(&name) {
        return refuse(&RelayError::NameNotFound { name });
    }
    configure(ws, &state.config).on_upgrade(move |socket| accept_subscriber(socket, state, name))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.registry.counts();
    Json(health::health_check(
        state.start_time,
        counts.channels,
        counts.publishers,
        counts.subscribers,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn accept_generated_publisher(socket: WebSocket, state: AppState) {
    let (handle, frames) = open_socket(socket, state.shutdown.child_token(), &state.config.socket);
    let channel = state.registry.create_named_channel(Arc::clone(&handle));
    let assigned = Envelope::ChannelAssigned {
        name: channel.name().to_owned(),
    };
    if let Err(e) = handle.send_envelope(&assigned) {
        warn!(channel = %channel.name(), error = %e, "failed to send channel assignment");
    }
    run_publisher(channel, handle, frames).await;
}

async fn accept_named_publisher(socket: WebSocket, state: AppState, name: String) {
    let (handle, frames) = open_socket(socket, state.shutdown.child_token(), &state.config.socket);
    match state.registry.create_channel(&name, Arc::clone(&handle)) {
        Ok(channel) => run_publisher(channel, handle, frames).await,
        Err(e) => abort_socket(&handle, &e),
    }
}

async fn accept_reconnect(socket: WebSocket, state: AppState, name: String) {
    let (handle, frames) = open_socket(socket, state.shutdown.child_token(), &state.config.socket);
    match state.registry.reconnect_channel(&name, Arc::clone(&handle)) {
        Ok(channel) => run_publisher(channel, handle, frames).await,
        Err(e) => abort_socket(&handle, &e),
    }
}

async fn accept_subscriber(socket: WebSocket, state: AppState, name: String) {
    let (handle, frames) = open_socket(socket, state.shutdown.child_token(), &state.config.socket);
    match state.registry.try_attach_subscriber(&name, Arc::clone(&handle)) {
        Ok(session) => session.run(frames).await,
        Err(e) => abort_socket(&handle, &e),
    }
}

/// The channel changed between the pre-upgrade check and the handshake.
fn abort_socket(handle: &SocketHandle, err: &RelayError) {
    warn!(conn_id = %handle.id(), error = %err, "channel changed during upgrade, closing");
    counter!(UPGRADES_REJECTED_TOTAL, "code" => err.code()).increment(1);
    let _ = handle.send_envelope(&Envelope::DisconnectNotice);
    handle.close();
}

fn configure(
    ws: WebSocketUpgrade,
    config: &ServerConfig,
) -> WebSocketUpgrade<impl OnFailedUpgrade> {
    ws.read_buffer_size(config.receive_buffer_size)
        .max_message_size(config.max_message_size)
        .on_failed_upgrade(|e: axum::Error| warn!(error = %e, "websocket upgrade failed"))
}

fn refuse(err: &RelayError) -> Response {
    counter!(UPGRADES_REJECTED_TOTAL, "code" => err.code()).increment(1);
    if err.is_client_error() {
        info!(error = %err, "refusing upgrade");
        (status_for(err), err.to_string()).into_response()
    } else {
        warn!(error = %err, "upgrade failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
}

fn reject_upgrade(rejection: &WebSocketUpgradeRejection) -> Response {
    counter!(UPGRADES_REJECTED_TOTAL, "code" => "NOT_UPGRADE").increment(1);
    (StatusCode::BAD_REQUEST, rejection.body_text()).into_response()
}

fn status_for(err: &RelayError) -> StatusCode {
    match err {
        RelayError::NameNotFound { .. } => StatusCode::BAD_REQUEST,
        RelayError::DuplicateName { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
