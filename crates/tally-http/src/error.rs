//! Error responses for the administrative endpoints

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tally_store::SnapshotError;

/// Body of every failed admin request
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<&'static str>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<&'static str>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Snapshot(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Snapshot(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Snapshot(SnapshotError::InvalidEnvelope(_)) => "invalid_envelope",
            ApiError::Snapshot(SnapshotError::Restore { .. }) => "restore_failed",
            ApiError::Snapshot(SnapshotError::Export { .. } | SnapshotError::Serialize(_)) => {
                "export_failed"
            }
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        let ApiError::Snapshot(e) = self;
        ErrorResponse {
            error: self.error_code(),
            phase: e.phase().map(|phase| phase.as_str()),
            message: e.to_string(),
            table: e.table(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let body = self.to_error_response();

        if status_code.is_server_error() {
            tracing::error!(
                error_code = body.error,
                phase = body.phase,
                table = body.table,
                error_message = %self,
                "Admin request failed"
            );
        } else {
            tracing::warn!(error_code = body.error, error_message = %self, "Admin request rejected");
        }

        (status_code, Json(body)).into_response()
    }
}
