//! Axum route handlers for the Evaluation API.

use axum::{extract::State, Json};
use tracing::info;

use crate::errors::AppError;
use crate::evaluation::runner::{evaluate, EvaluateRequest, EvaluateResponse};
use crate::llm_client::policy::deadline_scope;
use crate::state::AppState;

/// POST /api/v1/evaluations
///
/// Runs every selected persona against the candidate in parallel and stores
/// the combined verdict. `partial: true` means the run deadline cut off
/// personas that had not answered yet.
pub async fn handle_evaluate(
    State(state): State<AppState>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, AppError> {
    let deadline = state
        .config
        .evaluation
        .with_override(request.config.as_ref())
        .run_deadline();
    // Dropping the guard (client gone) cancels in-flight persona calls.
    let (cancel, _guard) = deadline_scope(deadline);

    let response = evaluate(&state, request, &cancel).await?;
    info!(
        "Stored evaluation {} ({} verdicts)",
        response.result_id,
        response.evaluations.len()
    );
    Ok(Json(response))
}
