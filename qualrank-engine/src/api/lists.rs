//! Read-only views of committed ranking state

use axum::{
    extract::{Path, State},
    Json,
};
use qualrank_common::db::{ActivityEntry, ClassId, Qualifier, QualifierId, TierId};

use super::ApiError;
use crate::service::ClassView;
use crate::AppState;

/// GET /api/tiers/:tier/classes/:class
///
/// Participants (rank inside the limit), reserves and withdrawn rows.
pub async fn get_class_list(
    State(state): State<AppState>,
    Path((tier, class)): Path<(i64, i64)>,
) -> Result<Json<ClassView>, ApiError> {
    let view = state.service.class_view(TierId(tier), ClassId(class)).await?;
    Ok(Json(view))
}

/// GET /api/qualifiers/:id
pub async fn get_qualifier(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Qualifier>, ApiError> {
    Ok(Json(state.service.qualifier(QualifierId(id)).await?))
}

/// GET /api/tiers/:tier/activity
pub async fn get_activity(
    State(state): State<AppState>,
    Path(tier): Path<i64>,
) -> Result<Json<Vec<ActivityEntry>>, ApiError> {
    Ok(Json(state.service.activity(TierId(tier)).await?))
}
