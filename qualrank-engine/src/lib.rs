//! qualrank engine
//!
//! Maintains the ordered qualification lists of a cascading championship:
//! per tier and class, a dense ranking of participants and reserves under an
//! adjustable admission limit. All changes go through the mutation log and
//! are applied by a single [`worker::Worker`].

use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod cascade;
pub mod eligibility;
pub mod error;
pub mod ranking;
pub mod service;
pub mod store;
pub mod team;
pub mod transitions;
pub mod worker;

pub use error::TransitionError;
pub use service::QualificationService;
pub use worker::{PassSummary, Worker, WorkerConfig};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub service: QualificationService,
}

impl AppState {
    /// `wake` is the worker's waker, so enqueues and pings reach it
    pub fn new(db: SqlitePool, wake: Arc<Notify>) -> Self {
        Self {
            service: QualificationService::new(db, wake),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let api = Router::new()
        .route("/api/tiers/:tier/classes/:class", get(api::get_class_list))
        .route("/api/tiers/:tier/classes/:class/seed", post(api::enqueue_seed))
        .route("/api/tiers/:tier/classes/:class/limit", post(api::set_limit))
        .route("/api/tiers/:tier/classes/:class/cascade", post(api::enqueue_cascade))
        .route("/api/tiers/:tier/classes/:class/extra", post(api::enqueue_extra_entry))
        .route("/api/tiers/:tier/classes/:class/renumber", post(api::enqueue_renumber))
        .route("/api/tiers/:tier/activity", get(api::get_activity))
        .route("/api/qualifiers/:id", get(api::get_qualifier))
        .route("/api/qualifiers/:id/withdraw", post(api::enqueue_withdraw))
        .route("/api/qualifiers/:id/register", post(api::enqueue_register))
        .route("/api/qualifiers/:id/invite", post(api::enqueue_invite))
        .route("/api/qualifiers/:id/move", post(api::enqueue_move_class))
        .route("/api/worker/status", get(api::worker_status))
        .route("/api/worker/ping", post(api::ping_worker));

    Router::new()
        .merge(api)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
