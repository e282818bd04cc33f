//! Axum route handlers for the Debate API.

use axum::{extract::State, Json};

use crate::debate::orchestrator::{run_debate, DebateRequest, DebateResponse};
use crate::errors::AppError;
use crate::llm_client::policy::deadline_scope;
use crate::state::AppState;

/// POST /api/v1/debates
///
/// Runs a moderated debate among the selected personas and stores the
/// transcript. `incomplete: true` with an `abort_reason` means the moderator
/// could not open or close the debate.
pub async fn handle_run_debate(
    State(state): State<AppState>,
    Json(request): Json<DebateRequest>,
) -> Result<Json<DebateResponse>, AppError> {
    let deadline = state
        .config
        .evaluation
        .with_override(request.config.as_ref())
        .run_deadline();
    let (cancel, _guard) = deadline_scope(deadline);

    let response = run_debate(&state, request, &cancel).await?;
    Ok(Json(response))
}
