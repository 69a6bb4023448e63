//! HTTP metrics endpoint: `/metrics` (Prometheus text) and
//! `/metrics.json` (JSON snapshot).

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;

use super::Metrics;

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_text))
        .route("/metrics.json", get(metrics_json))
        .with_state(metrics)
}

async fn metrics_text(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (StatusCode::OK, metrics.export_prometheus())
}

async fn metrics_json(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    Json(metrics.export_json())
}

pub async fn serve(metrics: Arc<Metrics>, port: u16, cancel: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
    let app = router(metrics);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
