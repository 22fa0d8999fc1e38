//! Integration tests for the daemon API endpoints

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use pulse_core::{
    health::{components, ComponentStatus, HealthRegistry},
    observability::PulseMetrics,
    orchestrator::StatusSnapshot,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tower::ServiceExt;

#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: PulseMetrics,
    pub status_rx: watch::Receiver<StatusSnapshot>,
    pub bus_tx: mpsc::Sender<Vec<u8>>,
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

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

async fn statusz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.status_rx.borrow().clone();
    Json(snapshot)
}

async fn ingest(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    match state.bus_tx.try_send(body.to_vec()) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn create_test_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/statusz", get(statusz))
        .route("/ingest", post(ingest))
        .with_state(state)
}

fn setup_test_app() -> (Router, Arc<AppState>, mpsc::Receiver<Vec<u8>>) {
    let health_registry = HealthRegistry::new();
    let (bus_tx, bus_rx) = mpsc::channel(4);
    let (_status_tx, status_rx) = watch::channel(StatusSnapshot::default());

    let state = Arc::new(AppState {
        health_registry,
        metrics: PulseMetrics::new(),
        status_rx,
        bus_tx,
    });
    let router = create_test_router(state.clone());

    (router, state, bus_rx)
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, state, _bus_rx) = setup_test_app();
    state.health_registry.register(components::ORCHESTRATOR).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _bus_rx) = setup_test_app();
    state.health_registry.register(components::ORCHESTRATOR).await;
    state
        .health_registry
        .set_unhealthy(components::ORCHESTRATOR, "bus subscription lost")
        .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_not_ready_before_initialization() {
    let (app, _state, _bus_rx) = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/readyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_ready_after_initialization() {
    let (app, state, _bus_rx) = setup_test_app();
    state.health_registry.set_ready(true).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/readyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_prometheus_text() {
    let (app, _state, _bus_rx) = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
}

#[tokio::test]
async fn test_statusz_serves_snapshot() {
    let (app, _state, _bus_rx) = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/statusz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let snapshot: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(snapshot.get("generated_at").is_some());
    assert!(snapshot.get("recent_decisions").is_some());
}

#[tokio::test]
async fn test_ingest_enqueues_payload() {
    let (app, _state, mut bus_rx) = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/ingest")
                .body(Body::from(
                    r#"{"cpu": 42.0, "latency": 100.0, "error_rate": 0.1}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let payload = bus_rx.try_recv().unwrap();
    assert!(payload.starts_with(b"{\"cpu\""));
}
