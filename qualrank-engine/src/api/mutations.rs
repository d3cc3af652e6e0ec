//! Mutation enqueue endpoints
//!
//! Every handler appends one record and returns its id; none of them waits
//! for the worker.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use qualrank_common::db::{ClassId, EligibleEntry, MutationId, QualifierId, TierId};
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::AppState;

const DEFAULT_ACTOR: &str = "admin api";

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    #[serde(default)]
    pub actor: Option<String>,
}

impl ActorRequest {
    fn actor(&self) -> &str {
        self.actor.as_deref().unwrap_or(DEFAULT_ACTOR)
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitRequest {
    pub new_limit: i64,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeedRequest {
    pub eligible: Vec<EligibleEntry>,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExtraEntryRequest {
    pub entry: EligibleEntry,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub class_id: i64,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueuedResponse {
    pub mutation_id: MutationId,
}

type Enqueued = Result<(StatusCode, Json<EnqueuedResponse>), ApiError>;

fn accepted(mutation_id: MutationId) -> (StatusCode, Json<EnqueuedResponse>) {
    (StatusCode::ACCEPTED, Json(EnqueuedResponse { mutation_id }))
}

/// POST /api/tiers/:tier/classes/:class/seed
pub async fn enqueue_seed(
    State(state): State<AppState>,
    Path((tier, class)): Path<(i64, i64)>,
    Json(request): Json<SeedRequest>,
) -> Enqueued {
    let actor = request.actor.as_deref().unwrap_or(DEFAULT_ACTOR);
    let id = state
        .service
        .enqueue_seed(TierId(tier), ClassId(class), &request.eligible, actor)
        .await?;
    Ok(accepted(id))
}

/// POST /api/tiers/:tier/classes/:class/limit
pub async fn set_limit(
    State(state): State<AppState>,
    Path((tier, class)): Path<(i64, i64)>,
    Json(request): Json<LimitRequest>,
) -> Enqueued {
    let actor = request.actor.as_deref().unwrap_or(DEFAULT_ACTOR);
    let id = state
        .service
        .enqueue_cut_change(TierId(tier), ClassId(class), request.new_limit, actor)
        .await?;
    Ok(accepted(id))
}

/// POST /api/tiers/:tier/classes/:class/cascade
pub async fn enqueue_cascade(
    State(state): State<AppState>,
    Path((tier, class)): Path<(i64, i64)>,
    Json(request): Json<ActorRequest>,
) -> Enqueued {
    let id = state
        .service
        .enqueue_cascade(TierId(tier), ClassId(class), request.actor())
        .await?;
    Ok(accepted(id))
}

/// POST /api/tiers/:tier/classes/:class/extra
pub async fn enqueue_extra_entry(
    State(state): State<AppState>,
    Path((tier, class)): Path<(i64, i64)>,
    Json(request): Json<ExtraEntryRequest>,
) -> Enqueued {
    let actor = request.actor.as_deref().unwrap_or(DEFAULT_ACTOR);
    let id = state
        .service
        .enqueue_extra_entry(TierId(tier), ClassId(class), &request.entry, actor)
        .await?;
    Ok(accepted(id))
}

/// POST /api/tiers/:tier/classes/:class/renumber
pub async fn enqueue_renumber(
    State(state): State<AppState>,
    Path((tier, class)): Path<(i64, i64)>,
    Json(request): Json<ActorRequest>,
) -> Enqueued {
    let id = state
        .service
        .enqueue_renumber(TierId(tier), ClassId(class), request.actor())
        .await?;
    Ok(accepted(id))
}

/// POST /api/qualifiers/:id/move
pub async fn enqueue_move_class(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<MoveRequest>,
) -> Enqueued {
    let actor = request.actor.as_deref().unwrap_or(DEFAULT_ACTOR);
    let mutation = state
        .service
        .enqueue_move_class(QualifierId(id), ClassId(request.class_id), actor)
        .await?;
    Ok(accepted(mutation))
}

/// POST /api/qualifiers/:id/withdraw
pub async fn enqueue_withdraw(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ActorRequest>,
) -> Enqueued {
    let mutation = state
        .service
        .enqueue_withdraw(QualifierId(id), request.actor())
        .await?;
    Ok(accepted(mutation))
}

/// POST /api/qualifiers/:id/register
pub async fn enqueue_register(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ActorRequest>,
) -> Enqueued {
    let mutation = state
        .service
        .enqueue_register(QualifierId(id), request.actor())
        .await?;
    Ok(accepted(mutation))
}

/// POST /api/qualifiers/:id/invite
pub async fn enqueue_invite(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ActorRequest>,
) -> Enqueued {
    let mutation = state
        .service
        .enqueue_invite(QualifierId(id), request.actor())
        .await?;
    Ok(accepted(mutation))
}
