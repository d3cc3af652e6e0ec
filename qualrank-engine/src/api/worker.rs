//! Worker status and wake-up

use axum::{extract::State, http::StatusCode, Json};

use super::ApiError;
use crate::service::WorkerStatus;
use crate::AppState;

/// GET /api/worker/status
pub async fn worker_status(State(state): State<AppState>) -> Result<Json<WorkerStatus>, ApiError> {
    Ok(Json(state.service.worker_status().await?))
}

/// POST /api/worker/ping
pub async fn ping_worker(State(state): State<AppState>) -> StatusCode {
    state.service.ping();
    StatusCode::ACCEPTED
}
