//! Backup, restore and health handlers

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tally_store::snapshot::{self, Envelope};

use crate::AdminState;
use crate::error::ApiError;

/// GET /admin/backup - Download a full snapshot as an attachment
pub async fn download_backup(State(state): State<AdminState>) -> Result<Response, ApiError> {
    let envelope = snapshot::export(state.db.as_ref()).await?;
    let body = envelope.to_json_pretty()?;
    let filename = envelope.file_name();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response())
}

/// POST /admin/restore - Replace all data with an uploaded snapshot
///
/// The body is parsed here rather than through the `Json` extractor so that
/// malformed uploads get the same error shape as every other failure.
pub async fn upload_restore(
    State(state): State<AdminState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let envelope = Envelope::from_slice(&body)?;
    let report = snapshot::import(state.db.as_ref(), &envelope).await?;

    Ok(Json(json!({
        "status": "restored",
        "restoredAt": report.restored_at,
        "counts": report.counts,
    })))
}

/// GET /health - Backend liveness
pub async fn health_check(State(state): State<AdminState>) -> (StatusCode, Json<Value>) {
    let backend = state.db.backend();
    match state.db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "backend": backend })),
        ),
        Err(e) => {
            tracing::warn!(%backend, error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "backend": backend, "message": e.to_string() })),
            )
        }
    }
}
