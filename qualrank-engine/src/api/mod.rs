//! Admin HTTP API
//!
//! Thin surface over [`QualificationService`](crate::service::QualificationService):
//! list reads, mutation enqueueing and worker status. Enqueue endpoints
//! answer 202 with the mutation id; the effect shows up once the worker
//! has processed it.

pub mod health;
pub mod lists;
pub mod mutations;
pub mod worker;

pub use health::health_routes;
pub use lists::{get_activity, get_class_list, get_qualifier};
pub use mutations::{
    enqueue_cascade, enqueue_extra_entry, enqueue_invite, enqueue_move_class, enqueue_register,
    enqueue_renumber, enqueue_seed, enqueue_withdraw, set_limit,
};
pub use worker::{ping_worker, worker_status};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Error response wrapper for [`qualrank_common::Error`]
#[derive(Debug)]
pub struct ApiError(pub qualrank_common::Error);

impl From<qualrank_common::Error> for ApiError {
    fn from(err: qualrank_common::Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use qualrank_common::Error;

        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) | Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::TierClosed(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self.0);
        }

        let body = Json(json!({
            "error": self.0.to_string(),
        }));

        (status, body).into_response()
    }
}
