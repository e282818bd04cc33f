use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::evaluation::EvaluationResult;
use crate::state::AppState;

/// GET /api/v1/results/:id
pub async fn handle_get_result(
    State(state): State<AppState>,
    Path(result_id): Path<Uuid>,
) -> Result<Json<EvaluationResult>, AppError> {
    let result = state
        .store
        .get(result_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Result {result_id} not found")))?;
    Ok(Json(result))
}

/// DELETE /api/v1/results/:id
pub async fn handle_delete_result(
    State(state): State<AppState>,
    Path(result_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !state.store.delete(result_id).await? {
        return Err(AppError::NotFound(format!("Result {result_id} not found")));
    }
    info!("Deleted result {result_id}");
    Ok(StatusCode::NO_CONTENT)
}
