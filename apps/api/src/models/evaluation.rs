use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::transcript::TranscriptTurn;
use crate::transcript;

/// One persona's verdict on a candidate. `score` is on a 0–10 scale when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaVerdict {
    pub persona_name: String,
    pub score: Option<f64>,
    pub analysis: String,
    pub recommendation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub big_hits: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub big_misses: Option<String>,
}

/// Coarse direction of a recommendation text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationBucket {
    Positive,
    Neutral,
    Negative,
}

/// Aggregated verdict across every persona that answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedResult {
    /// Absent when no persona produced a numeric score.
    pub combined_score: Option<f64>,
    pub combined_recommendation: String,
    pub combined_analysis: String,
    pub recommendation_bucket: RecommendationBucket,
}

/// Stored form of an evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub evaluations: BTreeMap<String, PersonaVerdict>,
    pub combined: CombinedResult,
    #[serde(default)]
    pub partial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Evaluation,
    Debate,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Evaluation => "evaluation",
            ResultType::Debate => "debate",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evaluation" => Ok(ResultType::Evaluation),
            "debate" => Ok(ResultType::Debate),
            other => Err(anyhow::anyhow!("unknown result_type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultData {
    Evaluation(EvaluationOutcome),
    Debate(Vec<TranscriptTurn>),
}

impl ResultData {
    pub fn result_type(&self) -> ResultType {
        match self {
            ResultData::Evaluation(_) => ResultType::Evaluation,
            ResultData::Debate(_) => ResultType::Debate,
        }
    }
}

/// How a write treats an existing run for the same candidate, job, type and persona set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Fail with `AlreadyExists` when the run already exists.
    #[default]
    CreateOnly,
    /// Replace the existing run.
    Overwrite,
    /// Always store a new run.
    ForceDuplicate,
}

/// Identity of a run for `WriteMode` purposes. Persona order is irrelevant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunKey {
    pub candidate_id: String,
    pub job_id: String,
    pub result_type: ResultType,
    pub selected_personas: Vec<String>,
}

impl RunKey {
    pub fn new(
        candidate_id: &str,
        job_id: &str,
        result_type: ResultType,
        selected_personas: &[String],
    ) -> Self {
        let mut personas = selected_personas.to_vec();
        personas.sort();
        personas.dedup();
        Self {
            candidate_id: candidate_id.to_string(),
            job_id: job_id.to_string(),
            result_type,
            selected_personas: personas,
        }
    }

    /// Stable text identity of the run, used to name its write lock.
    pub fn lock_name(&self) -> String {
        const SEP: char = '\u{1f}';
        format!(
            "{}{SEP}{}{SEP}{}{SEP}{}",
            self.candidate_id,
            self.job_id,
            self.result_type,
            self.selected_personas.join(&SEP.to_string())
        )
    }

    pub fn matches(&self, result: &EvaluationResult) -> bool {
        result.candidate_id == self.candidate_id
            && result.job_id == self.job_id
            && result.result_type == self.result_type
            && RunKey::new(
                &result.candidate_id,
                &result.job_id,
                result.result_type,
                &result.selected_personas,
            )
            .selected_personas
                == self.selected_personas
    }
}

/// A run ready to be written; the store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewEvaluationResult {
    pub candidate_id: String,
    pub job_id: String,
    pub selected_personas: Vec<String>,
    pub company_note: Option<String>,
    pub result_data: ResultData,
    pub incomplete: bool,
    pub duration_ms: Option<i64>,
}

impl NewEvaluationResult {
    pub fn key(&self) -> RunKey {
        RunKey::new(
            &self.candidate_id,
            &self.job_id,
            self.result_data.result_type(),
            &self.selected_personas,
        )
    }

    pub fn into_stored(self, id: Uuid, created_at: DateTime<Utc>) -> EvaluationResult {
        EvaluationResult {
            id,
            candidate_id: self.candidate_id,
            job_id: self.job_id,
            result_type: self.result_data.result_type(),
            selected_personas: self.selected_personas,
            company_note: self.company_note,
            result_data: self.result_data,
            incomplete: self.incomplete,
            duration_ms: self.duration_ms,
            created_at,
        }
    }
}

/// A stored evaluation or debate run. Immutable apart from deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub id: Uuid,
    pub candidate_id: String,
    pub job_id: String,
    pub result_type: ResultType,
    pub selected_personas: Vec<String>,
    pub company_note: Option<String>,
    pub result_data: ResultData,
    /// Set when the run ended degraded (partial aggregation or aborted debate).
    pub incomplete: bool,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl EvaluationResult {
    pub fn transcript(&self) -> Option<&[TranscriptTurn]> {
        match &self.result_data {
            ResultData::Debate(turns) => Some(turns),
            ResultData::Evaluation(_) => None,
        }
    }

    pub fn outcome(&self) -> Option<&EvaluationOutcome> {
        match &self.result_data {
            ResultData::Evaluation(outcome) => Some(outcome),
            ResultData::Debate(_) => None,
        }
    }

    /// Plain-text rendering used as chat context and for similarity scoring.
    pub fn render_text(&self) -> String {
        match &self.result_data {
            ResultData::Debate(turns) => transcript::render_markdown(turns),
            ResultData::Evaluation(outcome) => {
                let mut out = String::new();
                if let Some(score) = outcome.combined.combined_score {
                    out.push_str(&format!("Gecombineerde score: {score:.1}/10\n"));
                }
                out.push_str(&format!(
                    "Gecombineerd advies: {}\n\n",
                    outcome.combined.combined_recommendation
                ));
                out.push_str(&outcome.combined.combined_analysis);
                out
            }
        }
    }
}
