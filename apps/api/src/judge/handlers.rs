use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::judge::scorer::{judge, JudgeEvaluation, JudgeWeights};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct JudgeQuery {
    /// Number of closest historical runs averaged into consistency.
    pub top_k: Option<usize>,
}

/// GET /api/v1/results/:id/judge
pub async fn handle_judge(
    State(state): State<AppState>,
    Path(result_id): Path<Uuid>,
    Query(params): Query<JudgeQuery>,
) -> Result<Json<JudgeEvaluation>, AppError> {
    let mut weights = JudgeWeights::default();
    if let Some(top_k) = params.top_k {
        if top_k == 0 {
            return Err(AppError::Validation("top_k must be at least 1".to_string()));
        }
        weights.top_k = top_k;
    }
    let evaluation = judge(state.store.as_ref(), result_id, &weights).await?;
    Ok(Json(evaluation))
}
