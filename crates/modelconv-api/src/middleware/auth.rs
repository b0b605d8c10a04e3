//! Shared access-key middleware.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use modelconv_core::AppError;

use crate::state::AppState;

/// Header carrying the shared access key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Rejects requests whose `x-api-key` does not match the configured key.
///
/// Passes everything through when no key is configured.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if !state.orchestrator.authorize(presented) {
        return Err(AppError::authentication("Missing or invalid API key"));
    }

    Ok(next.run(request).await)
}
