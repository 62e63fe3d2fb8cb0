//! Download job API handlers.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use streamgrab_core::job::DEFAULT_LIST_LIMIT;
use streamgrab_core::{Candidate, CreateJobRequest, Job, JobError, SchedulerError};
use tracing::{debug, error};

use crate::state::AppState;

/// Maximum allowed limit for history queries
const MAX_LIMIT: usize = 1000;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing downloads
#[derive(Debug, Deserialize)]
pub struct ListDownloadsParams {
    /// Maximum number of jobs to return, most recent first
    pub limit: Option<usize>,
}

/// Optional request body for retrying a download
#[derive(Debug, Default, Deserialize)]
pub struct RetryBody {
    /// Replacement mirror list; the previous one is kept when absent
    #[serde(default)]
    pub candidates: Option<Vec<Candidate>>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Domain error mapped onto an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<&JobError> for ApiError {
    fn from(e: &JobError) -> Self {
        let status = match e {
            JobError::Validation(_) => StatusCode::BAD_REQUEST,
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::Conflict { .. } => StatusCode::CONFLICT,
            JobError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        ApiError::from(e.as_job_error())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.message);
        } else {
            debug!("Request rejected ({}): {}", self.status, self.message);
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a new download
pub async fn create_download(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let Json(request) = body?;
    let job = state.scheduler().submit(request)?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// Download history, most recent first
pub async fn list_downloads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDownloadsParams>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(state.scheduler().list(limit)?))
}

/// Get a download by ID
pub async fn get_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.scheduler().get(&id)?))
}

/// Requeue a failed or completed download
pub async fn retry_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Job>, ApiError> {
    let retry: RetryBody = if body.iter().all(u8::is_ascii_whitespace) {
        RetryBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid retry body: {}", e)))?
    };

    Ok(Json(state.scheduler().retry(&id, retry.candidates)?))
}

/// Cancel a queued or running download
///
/// A running download is returned still `downloading`; the cancellation
/// arrives later on the event channel.
pub async fn cancel_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.scheduler().cancel(&id)?))
}

/// Delete a finished download and its output file
pub async fn delete_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.scheduler().delete(&id)?))
}
