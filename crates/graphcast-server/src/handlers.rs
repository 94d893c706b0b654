//! Connection handlers for the graphcast server.
//!
//! This module handles the connection lifecycle and the publish endpoint.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocket, DefaultBodyLimit, Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::StreamExt;
use graphcast_core::{validate_channel_id, Hub};
use graphcast_transport::{wait_for_close, AxumSink};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The broadcast hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            hub: Hub::with_config(config.hub.hub_config()),
            config,
        }
    }
}

/// Build the HTTP router.
///
/// # Errors
///
/// Returns an error if the configured publish path is invalid.
pub fn build_router(state: Arc<AppState>) -> Result<Router> {
    let config = &state.config;
    let router = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route(
            &config.publish_route()?,
            post(publish_handler).layer(DefaultBodyLimit::max(config.limits.max_payload_size)),
        )
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(Arc::clone(&state));
    Ok(router)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_router(Arc::clone(&state))?;

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("graphcast listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}?{}=<graph>",
        addr, config.transport.websocket_path, config.transport.channel_param
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Upgraded connections outlive the HTTP server; close them explicitly.
    state.hub.shutdown();
    info!("graphcast stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Hub statistics handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    Json(serde_json::json!({
        "graphs": stats.channel_count,
        "connections": stats.member_count,
    }))
}

/// Publish handler. The request body is broadcast as-is.
async fn publish_handler(
    State(state): State<Arc<AppState>>,
    Path(graph_id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let bytes = body.len();
    let report = state.hub.publish(&graph_id, body);
    metrics::record_publish(bytes, &report);

    debug!(graph = %graph_id, bytes, recipients = report.recipients, "Published");

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "recipients": report.recipients })),
    )
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let graph_id = params
        .get(&state.config.transport.channel_param)
        .cloned()
        .unwrap_or_default();

    if let Err(reason) = validate_channel_id(&graph_id) {
        warn!("Failed to accept connection: {}", reason);
        metrics::record_error("invalid_graph");
        return (StatusCode::BAD_REQUEST, reason).into_response();
    }

    if state.hub.stats().member_count >= state.config.limits.max_connections {
        warn!(graph = %graph_id, "Connection limit reached");
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    // A join after the upgrade can only fail by dropping the socket.
    if !state.hub.channel_exists(&graph_id)
        && state.hub.stats().channel_count >= state.hub.config().max_channels
    {
        warn!(graph = %graph_id, "Graph limit reached");
        metrics::record_error("channel_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Maximum graphs reached").into_response();
    }

    ws.on_upgrade(move |socket| handle_websocket(socket, graph_id, state))
        .into_response()
}

/// Handle a WebSocket connection for its whole lifetime.
async fn handle_websocket(socket: WebSocket, graph_id: String, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (sender, receiver) = socket.split();

    let handle = match state.hub.join(&graph_id, AxumSink::new(sender)) {
        Ok(handle) => handle,
        Err(e) => {
            error!(graph = %graph_id, error = %e, "Failed to join graph");
            metrics::record_error("join");
            return;
        }
    };
    metrics::set_active_channels(state.hub.stats().channel_count);

    debug!(graph = %graph_id, member = %handle.id(), "WebSocket connected");

    tokio::select! {
        reason = wait_for_close(receiver) => {
            debug!(graph = %graph_id, member = %handle.id(), reason = ?reason, "Peer disconnected");
        }
        _ = handle.closed() => {
            debug!(graph = %graph_id, member = %handle.id(), "Member closed by hub");
        }
    }

    state.hub.leave(&handle);
    metrics::set_active_channels(state.hub.stats().channel_count);

    debug!(graph = %graph_id, member = %handle.id(), "WebSocket disconnected");
}
