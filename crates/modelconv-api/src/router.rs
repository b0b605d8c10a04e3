//! Route definitions for the modelconv HTTP API.
//!
//! All routes are mounted under `/api`. Conversion and converter health
//! routes sit behind the access-key middleware; liveness does not.

use axum::{Router, extract::DefaultBodyLimit, middleware as axum_middleware, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware;
use crate::state::AppState;

/// Build the complete Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let max_upload = usize::try_from(state.config.server.max_upload_bytes).unwrap_or(usize::MAX);

    let api_routes = Router::new()
        .merge(protected_routes(state.clone()))
        .route("/health", get(handlers::health::health));

    let cors = middleware::cors::build_cors_layer(&state.config.server.cors);

    Router::new()
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum_middleware::from_fn(middleware::logging::request_logging))
        .with_state(state)
}

/// Conversion and converter diagnostics, gated by the access key.
fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/convert",
            get(handlers::convert::convert_sample).post(handlers::convert::upload),
        )
        .route("/health/converter", get(handlers::convert::convert_sample))
        .route("/health/metrics", get(handlers::health::metrics))
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::auth::require_api_key,
        ))
}
