use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::evaluation::{EvaluationResult, NewEvaluationResult, ResultType, RunKey, WriteMode};
use crate::models::persona::Persona;
use crate::storage::{resolve_write, PersonaDirectory, ResultStore, HISTORY_LIMIT};

/// Process-local store for development and tests. Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryResultStore {
    results: RwLock<Vec<EvaluationResult>>,
    personas: RwLock<HashMap<String, Persona>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_personas(personas: Vec<Persona>) -> Self {
        Self {
            results: RwLock::new(Vec::new()),
            personas: RwLock::new(personas.into_iter().map(|p| (p.name.clone(), p)).collect()),
        }
    }

    /// Loads personas from a JSON array file.
    pub fn from_personas_file(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read personas file '{path}': {e}"))?;
        let personas: Vec<Persona> = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("invalid personas file '{path}': {e}"))?;
        info!("Loaded {} personas from {}", personas.len(), path);
        Ok(Self::with_personas(personas))
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn get(&self, id: Uuid) -> Result<Option<EvaluationResult>, AppError> {
        Ok(self.results.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn put(&self, result: NewEvaluationResult, mode: WriteMode) -> Result<Uuid, AppError> {
        let key = result.key();
        let mut results = self.results.write().await;

        let existing = results.iter().find(|r| key.matches(r)).map(|r| r.id);
        if let Some(replaced) = resolve_write(mode, existing)? {
            results.retain(|r| r.id != replaced);
        }

        let id = Uuid::new_v4();
        results.push(result.into_stored(id, Utc::now()));
        Ok(id)
    }

    async fn find_run(&self, key: &RunKey) -> Result<Option<Uuid>, AppError> {
        Ok(self
            .results
            .read()
            .await
            .iter()
            .find(|r| key.matches(r))
            .map(|r| r.id))
    }

    async fn list_similar(
        &self,
        selected_personas: &[String],
        result_type: ResultType,
    ) -> Result<Vec<EvaluationResult>, AppError> {
        let mut similar: Vec<EvaluationResult> = self
            .results
            .read()
            .await
            .iter()
            .filter(|r| r.result_type == result_type)
            .filter(|r| r.selected_personas.iter().any(|p| selected_personas.contains(p)))
            .cloned()
            .collect();
        similar.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        similar.truncate(HISTORY_LIMIT);
        Ok(similar)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let mut results = self.results.write().await;
        let before = results.len();
        results.retain(|r| r.id != id);
        Ok(results.len() < before)
    }
}

#[async_trait]
impl PersonaDirectory for InMemoryResultStore {
    async fn get_persona(&self, name: &str) -> Result<Option<Persona>, AppError> {
        Ok(self.personas.read().await.get(name).cloned())
    }

    async fn list_personas(&self) -> Result<Vec<Persona>, AppError> {
        let mut personas: Vec<Persona> = self
            .personas
            .read()
            .await
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        personas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(personas)
    }
}
