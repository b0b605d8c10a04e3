//! Conversion handlers: upload intake and artifact streaming.

use std::path::Path;

use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use modelconv_core::{AppError, AppResult};
use modelconv_pipeline::{ArtifactStream, UploadedFile};

use crate::state::AppState;

/// Multipart field carrying the upload.
const FILE_FIELD: &str = "file";

/// Name used when the client sends no filename.
const FALLBACK_FILE_NAME: &str = "noName";

/// POST /api/convert
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let mut uploaded: Option<UploadedFile> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(format!("Multipart error: {e}")))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let original_name = field
            .file_name()
            .filter(|n| !n.is_empty())
            .unwrap_or(FALLBACK_FILE_NAME)
            .to_string();

        if uploaded.is_some() {
            debug!(filename = %original_name, "Ignoring additional uploaded file");
            continue;
        }

        // Guard first: an early return or a dropped request removes the spool.
        let spooled = UploadedFile {
            original_name,
            temp_path: state.orchestrator.upload_spool_path(),
        };
        spool_field(&mut field, &spooled.temp_path).await?;
        uploaded = Some(spooled);
    }

    let uploaded = uploaded.ok_or_else(|| AppError::validation("file is required"))?;

    let stream = state.orchestrator.handle_upload(uploaded).await?;
    artifact_response(stream)
}

/// GET /api/convert and GET /api/health/converter
///
/// Converts the bundled sample. Any failure is reported as 503.
pub async fn convert_sample(State(state): State<AppState>) -> AppResult<Response> {
    let stream = state
        .orchestrator
        .health_check()
        .await
        .map_err(|e| AppError::service_unavailable(format!("Converter unavailable: {e}")))?;
    artifact_response(stream)
}

/// Write a multipart field to disk chunk by chunk.
async fn spool_field(
    field: &mut axum::extract::multipart::Field<'_>,
    path: &Path,
) -> AppResult<()> {
    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::validation(format!("Read error: {e}")))?
    {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

fn artifact_response(stream: ArtifactStream) -> AppResult<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, stream.size())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", stream.file_name()),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::internal(format!("Response build failed: {e}")))
}
