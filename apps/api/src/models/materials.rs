use serde::{Deserialize, Serialize};

use crate::config::EvaluationConfig;
use crate::errors::AppError;

/// Candidate identifier plus extracted résumé/profile text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateMaterials {
    pub candidate_id: String,
    #[serde(default)]
    pub text: String,
}

/// Job identifier plus the vacancy text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMaterials {
    pub job_id: String,
    #[serde(default)]
    pub text: String,
}

/// Everything a persona sees about the candidate/job pair in a single run.
#[derive(Debug, Clone)]
pub struct RunMaterials {
    pub candidate: CandidateMaterials,
    pub job: JobMaterials,
    pub company_note: Option<String>,
}

impl RunMaterials {
    pub fn new(
        candidate: CandidateMaterials,
        job: JobMaterials,
        company_note: Option<String>,
    ) -> Self {
        let company_note = company_note
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        Self {
            candidate,
            job,
            company_note,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.candidate.candidate_id.trim().is_empty() {
            return Err(AppError::Validation("candidate_id cannot be empty".to_string()));
        }
        if self.job.job_id.trim().is_empty() {
            return Err(AppError::Validation("job_id cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Renders the materials as prompt context, truncating long texts when enabled.
    pub fn render_context(&self, config: &EvaluationConfig) -> String {
        let mut out = format!(
            "VACATURE (job {}):\n{}\n\nKANDIDAAT (kandidaat {}):\n{}\n",
            self.job.job_id,
            config.truncate(&self.job.text),
            self.candidate.candidate_id,
            config.truncate(&self.candidate.text),
        );
        if let Some(note) = &self.company_note {
            out.push_str(&format!("\nBEDRIJFSNOTITIE:\n{}\n", config.truncate(note)));
        }
        out
    }
}
