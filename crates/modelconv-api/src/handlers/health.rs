//! Health check handlers.

use axum::Json;
use axum::extract::State;

use crate::dto::{ApiResponse, HealthResponse, MetricsResponse};
use crate::state::AppState;

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::ok(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

/// GET /api/health/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<ApiResponse<MetricsResponse>> {
    let orchestrator = &state.orchestrator;
    Json(ApiResponse::ok(MetricsResponse {
        converter_available: orchestrator.invoker().check_available().await,
        available_slots: orchestrator.invoker().available_slots(),
        metrics: orchestrator.metrics_snapshot(),
    }))
}
