use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use registry_core::deadline::with_deadline;
use serde_json::json;

use crate::services::get_metrics;
use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let backend = state.stores.organizations.backend_type();
    match with_deadline(state.timeout(), state.stores.organizations.health_check()).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "registry-service",
                "version": env!("CARGO_PKG_VERSION"),
                "backend": backend,
                "storage": state.storage.backing_store_name(),
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, backend, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "registry-service",
                    "backend": backend,
                })),
            )
        }
    }
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
