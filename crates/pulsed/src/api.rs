//! HTTP API for health checks, Prometheus metrics, and control status

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use pulse_core::{
    health::{ComponentStatus, HealthRegistry},
    observability::PulseMetrics,
    orchestrator::StatusSnapshot,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: PulseMetrics,
    pub status_rx: watch::Receiver<StatusSnapshot>,
    /// Raw bus payloads flow to the ingest pump through this sender
    pub bus_tx: mpsc::Sender<Vec<u8>>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: PulseMetrics,
        status_rx: watch::Receiver<StatusSnapshot>,
        bus_tx: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            status_rx,
            bus_tx,
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Latest orchestrator snapshot: score, backlog, nodes, cooldowns.
async fn statusz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.status_rx.borrow().clone();
    Json(snapshot)
}

/// Recent decision history.
async fn decisions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.status_rx.borrow().clone();
    Json(snapshot.recent_decisions)
}

/// Bus ingress adapter: accepts a raw metrics message and enqueues it for
/// decoding. Malformed payloads are accepted here and counted downstream,
/// mirroring at-least-once bus semantics.
async fn ingest(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    match state.bus_tx.try_send(body.to_vec()) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/statusz", get(statusz))
        .route("/decisions", get(decisions))
        .route("/ingest", post(ingest))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
