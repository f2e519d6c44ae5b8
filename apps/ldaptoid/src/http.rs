//! Health and metrics HTTP endpoints.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use ldaptoid_snapshot::Health;

/// State for the probe and metrics routes.
#[derive(Clone)]
pub struct HttpState {
    pub health: Arc<Health>,
    pub metrics: PrometheusHandle,
}

/// Builds the router: readiness, liveness, and Prometheus metrics.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz/ready", get(ready_handler))
        .route("/healthz/live", get(live_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Ready once the first snapshot has been published. Degraded persistence
/// is reported in the body but does not fail the probe.
async fn ready_handler(State(state): State<HttpState>) -> impl IntoResponse {
    if !state.health.is_ready() {
        return (StatusCode::SERVICE_UNAVAILABLE, "no snapshot published yet");
    }
    if state.health.is_degraded() {
        return (StatusCode::OK, "ready (id persistence degraded)");
    }
    (StatusCode::OK, "ready")
}

/// Live until the refresh scheduler exhausts its retry budget and halts.
async fn live_handler(State(state): State<HttpState>) -> impl IntoResponse {
    if state.health.is_halted() {
        return (StatusCode::SERVICE_UNAVAILABLE, "refresh scheduler halted");
    }
    (StatusCode::OK, "live")
}

async fn metrics_handler(State(state): State<HttpState>) -> Response {
    let output = state.metrics.render();
    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )
        .body(Body::from(output))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
