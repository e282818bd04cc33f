pub mod health;
pub mod personas;
pub mod results;

use axum::{
    routing::{get, post},
    Router,
};

use crate::chat::handlers::handle_continue;
use crate::debate::handlers::handle_run_debate;
use crate::evaluation::handlers::handle_evaluate;
use crate::judge::handlers::handle_judge;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/personas", get(personas::handle_list_personas))
        // Panel runs
        .route("/api/v1/evaluations", post(handle_evaluate))
        .route("/api/v1/debates", post(handle_run_debate))
        // Stored results
        .route(
            "/api/v1/results/:id",
            get(results::handle_get_result).delete(results::handle_delete_result),
        )
        .route("/api/v1/results/:id/chat", post(handle_continue))
        .route("/api/v1/results/:id/judge", get(handle_judge))
        .with_state(state)
}
