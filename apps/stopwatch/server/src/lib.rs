//! Authoritative timekeeper for the shared stopwatch.
//!
//! Viewers connect over WebSocket at `/ws`, send `start`/`stop`/`reset`
//! commands, and receive every resulting state transition. The HTTP surface
//! also exposes `/healthz`, `/state` and `/metrics`.

use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use stopwatch_core::{Clock, SystemClock};
use tokio::{net::TcpListener, signal, task::JoinHandle};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

pub mod config;
pub mod registry;
pub mod telemetry;
pub mod timekeeper;
pub mod websocket;

use config::ServerConfig;
use timekeeper::{Timekeeper, TimekeeperHandle};

pub struct AppState {
    pub timekeeper: TimekeeperHandle,
    pub metrics: PrometheusHandle,
}

/// Spawns the timekeeper actor and wraps its handle in shared router state.
pub fn build_state(
    clock: Arc<dyn Clock>,
    metrics: PrometheusHandle,
) -> (Arc<AppState>, JoinHandle<()>) {
    let (timekeeper, task) = timekeeper::spawn(Timekeeper::new(clock));
    (
        Arc::new(AppState {
            timekeeper,
            metrics,
        }),
        task,
    )
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/state", get(state_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(websocket::ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn run(config: ServerConfig, metrics: PrometheusHandle) -> Result<()> {
    let (state, keeper_task) = build_state(Arc::new(SystemClock), metrics);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("stopwatch-server listening on {}", config.listen_addr);

    serve(listener, state, shutdown_signal()).await?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    keeper_task.abort();
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");

    Ok(())
}

pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("server shutdown with error")
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn state_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.timekeeper.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
