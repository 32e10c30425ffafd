//! REST API types for the dashboard.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{JobError, ServerError};
use crate::plan::PlanSummary;
use crate::preview::Preview;

/// Response to `POST /api/preview`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub file_name: String,
    pub file_size: usize,
    pub preview: Preview,
    /// How the file would be chunked if uploaded
    pub plan: PlanSummary,
}

/// Response to `POST /api/upload` once the job is running.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStarted {
    pub job_id: Uuid,
    pub status: String,
    pub total_lines: usize,
    pub total_chunks: usize,
    pub chunk_size: usize,
    pub preview: Preview,
}

/// Response to `POST /api/cancel`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub cancelled: bool,
}

/// Create an error response body
pub fn error_response(error: &str) -> Value {
    json!({
        "status": "error",
        "error": error,
    })
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Job(JobError::Parse(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Job(JobError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Busy => StatusCode::CONFLICT,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(error_response(&self.to_string()))).into_response()
    }
}
