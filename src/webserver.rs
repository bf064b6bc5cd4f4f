//! Liveness/readiness probes and the Prometheus `/metrics` endpoint.
//!
//! Probe *logic* beyond these three routes is out of scope (spec.md S1
//! lists webhook/probe servers among the external collaborators), but
//! the ambient serving stack itself -- axum on tokio -- is carried
//! regardless, the way the teacher's `webserver.rs` carries it.

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::metrics::Metrics;

pub async fn readiness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

async fn metrics(State(metrics): State<Metrics>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

pub fn create_app(metrics: Metrics) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/metrics", get(self::metrics))
        .with_state(metrics)
}
