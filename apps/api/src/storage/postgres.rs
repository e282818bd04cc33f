use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::evaluation::{
    EvaluationOutcome, EvaluationResult, NewEvaluationResult, ResultData, ResultType, RunKey,
    WriteMode,
};
use crate::models::persona::Persona;
use crate::storage::{resolve_write, PersonaDirectory, ResultStore, HISTORY_LIMIT};
use crate::transcript;

/// Raw `evaluation_results` row. Debate transcripts live in `result_data` as
/// text so rows written in the older marker format still decode.
#[derive(Debug, Clone, FromRow)]
pub struct EvaluationResultRow {
    pub id: Uuid,
    pub candidate_id: String,
    pub job_id: String,
    pub result_type: String,
    pub selected_personas: Vec<String>,
    pub company_note: Option<String>,
    pub result_data: String,
    pub incomplete: bool,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl EvaluationResultRow {
    pub fn into_result(self) -> Result<EvaluationResult, AppError> {
        let result_type: ResultType = self.result_type.parse().map_err(AppError::Internal)?;
        let result_data = match result_type {
            ResultType::Debate => ResultData::Debate(transcript::decode(&self.result_data)?),
            ResultType::Evaluation => {
                let outcome: EvaluationOutcome = serde_json::from_str(&self.result_data)
                    .map_err(|e| {
                        AppError::Internal(anyhow::anyhow!(
                            "evaluation {} has unreadable result_data: {e}",
                            self.id
                        ))
                    })?;
                ResultData::Evaluation(outcome)
            }
        };
        Ok(EvaluationResult {
            id: self.id,
            candidate_id: self.candidate_id,
            job_id: self.job_id,
            result_type,
            selected_personas: self.selected_personas,
            company_note: self.company_note,
            result_data,
            incomplete: self.incomplete,
            duration_ms: self.duration_ms,
            created_at: self.created_at,
        })
    }
}

/// Serializes result data for the `result_data` column.
pub fn encode_result_data(data: &ResultData) -> Result<String, AppError> {
    match data {
        ResultData::Debate(turns) => Ok(transcript::encode(turns)?),
        ResultData::Evaluation(outcome) => serde_json::to_string(outcome).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Failed to serialize evaluation outcome: {e}"))
        }),
    }
}

/// Postgres-backed result store and persona directory.
#[derive(Clone)]
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Serializes writers of the same run until the transaction ends, so two
/// `CreateOnly` puts cannot both miss the existing row.
const LOCK_RUN_SQL: &str = "SELECT pg_advisory_xact_lock(hashtext($1))";

const FIND_RUN_SQL: &str = r#"
    SELECT id FROM evaluation_results
    WHERE candidate_id = $1 AND job_id = $2 AND result_type = $3
      AND selected_personas @> $4 AND selected_personas <@ $4
    ORDER BY created_at DESC
    LIMIT 1
"#;

#[async_trait]
impl ResultStore for PgResultStore {
    async fn get(&self, id: Uuid) -> Result<Option<EvaluationResult>, AppError> {
        let row = sqlx::query_as::<_, EvaluationResultRow>(
            "SELECT * FROM evaluation_results WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EvaluationResultRow::into_result).transpose()
    }

    async fn put(&self, result: NewEvaluationResult, mode: WriteMode) -> Result<Uuid, AppError> {
        let key = result.key();
        let result_data = encode_result_data(&result.result_data)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(LOCK_RUN_SQL)
            .bind(key.lock_name())
            .execute(&mut *tx)
            .await?;

        let existing: Option<Uuid> = sqlx::query_scalar(FIND_RUN_SQL)
            .bind(&key.candidate_id)
            .bind(&key.job_id)
            .bind(key.result_type.as_str())
            .bind(&key.selected_personas)
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(replaced) = resolve_write(mode, existing)? {
            sqlx::query("DELETE FROM evaluation_results WHERE id = $1")
                .bind(replaced)
                .execute(&mut *tx)
                .await?;
            info!("Overwriting {} run {}", key.result_type, replaced);
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO evaluation_results
                (id, candidate_id, job_id, result_type, selected_personas,
                 company_note, result_data, incomplete, duration_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id)
        .bind(&result.candidate_id)
        .bind(&result.job_id)
        .bind(key.result_type.as_str())
        .bind(&result.selected_personas)
        .bind(&result.company_note)
        .bind(&result_data)
        .bind(result.incomplete)
        .bind(result.duration_ms)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn find_run(&self, key: &RunKey) -> Result<Option<Uuid>, AppError> {
        Ok(sqlx::query_scalar(FIND_RUN_SQL)
            .bind(&key.candidate_id)
            .bind(&key.job_id)
            .bind(key.result_type.as_str())
            .bind(&key.selected_personas)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_similar(
        &self,
        selected_personas: &[String],
        result_type: ResultType,
    ) -> Result<Vec<EvaluationResult>, AppError> {
        let rows = sqlx::query_as::<_, EvaluationResultRow>(
            r#"
            SELECT * FROM evaluation_results
            WHERE result_type = $1 AND selected_personas && $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(result_type.as_str())
        .bind(selected_personas)
        .bind(HISTORY_LIMIT as i64)
        .fetch_all(&self.pool)
        .await?;

        // A single unreadable legacy row should not hide the rest of the history.
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                row.into_result()
                    .map_err(|e| warn!("Skipping unreadable result {id}: {e}"))
                    .ok()
            })
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let deleted = sqlx::query("DELETE FROM evaluation_results WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}

#[async_trait]
impl PersonaDirectory for PgResultStore {
    async fn get_persona(&self, name: &str) -> Result<Option<Persona>, AppError> {
        Ok(
            sqlx::query_as::<_, Persona>("SELECT * FROM personas WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_personas(&self) -> Result<Vec<Persona>, AppError> {
        Ok(sqlx::query_as::<_, Persona>(
            "SELECT * FROM personas WHERE is_active ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?)
    }
}
