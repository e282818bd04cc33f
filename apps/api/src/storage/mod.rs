//! Storage contracts the core depends on. Persistence itself belongs to an
//! external collaborator; the adapters here are the two implementations the
//! service ships with.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::evaluation::{EvaluationResult, NewEvaluationResult, ResultType, RunKey, WriteMode};
use crate::models::persona::Persona;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryResultStore;
pub use postgres::PgResultStore;

/// Upper bound on history rows returned by `list_similar`, newest first.
pub const HISTORY_LIMIT: usize = 200;

/// Stored evaluation/debate runs. Carried in `AppState` as `Arc<dyn ResultStore>`.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<EvaluationResult>, AppError>;

    /// Writes a run according to `mode` and returns its id.
    async fn put(&self, result: NewEvaluationResult, mode: WriteMode) -> Result<Uuid, AppError>;

    /// Id of an existing run with the same identity, if any.
    async fn find_run(&self, key: &RunKey) -> Result<Option<Uuid>, AppError>;

    /// Runs of `result_type` sharing at least one persona with `selected_personas`, newest first.
    async fn list_similar(
        &self,
        selected_personas: &[String],
        result_type: ResultType,
    ) -> Result<Vec<EvaluationResult>, AppError>;

    /// Returns false when nothing was deleted.
    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;
}

/// Persona configuration lookup.
#[async_trait]
pub trait PersonaDirectory: Send + Sync {
    async fn get_persona(&self, name: &str) -> Result<Option<Persona>, AppError>;

    /// Active personas ordered by name.
    async fn list_personas(&self) -> Result<Vec<Persona>, AppError>;
}

/// Fails early with `AlreadyExists` when a `CreateOnly` run would collide,
/// so no LLM calls are spent on a run that cannot be stored.
pub async fn ensure_writable(
    store: &dyn ResultStore,
    key: &RunKey,
    mode: WriteMode,
) -> Result<(), AppError> {
    if mode != WriteMode::CreateOnly {
        return Ok(());
    }
    match store.find_run(key).await? {
        Some(existing_id) => Err(AppError::AlreadyExists { existing_id }),
        None => Ok(()),
    }
}

/// Shared `WriteMode` decision for adapters: returns the id to replace, if any.
pub(crate) fn resolve_write(mode: WriteMode, existing: Option<Uuid>) -> Result<Option<Uuid>, AppError> {
    match (mode, existing) {
        (WriteMode::CreateOnly, Some(existing_id)) => Err(AppError::AlreadyExists { existing_id }),
        (WriteMode::Overwrite, Some(existing_id)) => Ok(Some(existing_id)),
        _ => Ok(None),
    }
}
