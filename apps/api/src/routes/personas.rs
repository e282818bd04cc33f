use axum::{extract::State, Json};

use crate::errors::AppError;
use crate::models::persona::Persona;
use crate::state::AppState;

/// GET /api/v1/personas
/// Active personas available for selection, ordered by name.
pub async fn handle_list_personas(
    State(state): State<AppState>,
) -> Result<Json<Vec<Persona>>, AppError> {
    Ok(Json(state.personas.list_personas().await?))
}
