//! Axum route handlers for chat continuation.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::chat::engine::{continue_chat, ChatAnswer, ContinueRequest};
use crate::errors::AppError;
use crate::llm_client::policy::deadline_scope;
use crate::state::AppState;

/// POST /api/v1/results/:id/chat
///
/// Answers a follow-up question about a stored debate or evaluation, as one
/// persona or (without `persona`) as the panel.
pub async fn handle_continue(
    State(state): State<AppState>,
    Path(result_id): Path<Uuid>,
    Json(request): Json<ContinueRequest>,
) -> Result<Json<ChatAnswer>, AppError> {
    let deadline = state
        .config
        .evaluation
        .with_override(request.config.as_ref())
        .run_deadline();
    let (cancel, _guard) = deadline_scope(deadline);

    let answer = continue_chat(&state, result_id, request, &cancel).await?;
    Ok(Json(answer))
}
