use std::borrow::Cow;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::llm_client::policy::CallPolicy;

/// Which `ResultStore` backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => anyhow::bail!("unknown STORAGE_BACKEND '{other}' (expected postgres|memory)"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage_backend: StorageBackend,
    pub database_url: Option<String>,
    /// Optional JSON file of personas used to seed the in-memory directory.
    pub personas_file: Option<String>,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    /// Process-wide cap on concurrent LLM calls.
    pub llm_max_concurrency: usize,
    /// Defaults for every run; requests may override individual fields.
    pub evaluation: EvaluationConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let storage_backend: StorageBackend = env_or("STORAGE_BACKEND", StorageBackend::Postgres)?;
        let database_url = match storage_backend {
            StorageBackend::Postgres => Some(require_env("DATABASE_URL")?),
            StorageBackend::Memory => std::env::var("DATABASE_URL").ok(),
        };

        let defaults = EvaluationConfig::default();
        let evaluation = EvaluationConfig {
            truncate_inputs: env_or("TRUNCATE_INPUTS", defaults.truncate_inputs)?,
            max_input_chars: env_or("MAX_INPUT_CHARS", defaults.max_input_chars)?,
            prompt_density: env_or("PROMPT_DENSITY", defaults.prompt_density)?,
            call_timeout_secs: env_or("LLM_CALL_TIMEOUT_SECS", defaults.call_timeout_secs)?,
            max_retries: env_or("LLM_MAX_RETRIES", defaults.max_retries)?,
            backoff_base_ms: env_or("LLM_BACKOFF_BASE_MS", defaults.backoff_base_ms)?,
            debate_rounds: env_or("DEBATE_ROUNDS", defaults.debate_rounds)?,
            run_deadline_secs: env_or("RUN_DEADLINE_SECS", defaults.run_deadline_secs)?,
        };

        Ok(Config {
            storage_backend,
            database_url,
            personas_file: std::env::var("PERSONAS_FILE").ok(),
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: env_or("PORT", 8080u16)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            llm_max_concurrency: env_or("LLM_MAX_CONCURRENCY", 6usize)?,
            evaluation,
        })
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Config {
            storage_backend: StorageBackend::Memory,
            database_url: None,
            personas_file: None,
            anthropic_api_key: "test-key".to_string(),
            port: 0,
            rust_log: "debug".to_string(),
            llm_max_concurrency: 6,
            evaluation: EvaluationConfig::default(),
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} has an invalid value '{raw}': {e}")),
        Err(_) => Ok(default),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-run settings
// ────────────────────────────────────────────────────────────────────────────

/// Settings that shape every LLM call of a run. Passed explicitly to each call
/// site; the process default comes from [`Config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Cut candidate/job/company text to `max_input_chars`.
    pub truncate_inputs: bool,
    pub max_input_chars: usize,
    /// Multiplier on the requested answer length (1.0 = default detail).
    pub prompt_density: f32,
    pub call_timeout_secs: u64,
    /// Retries after the first attempt of a failed call.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Persona round-robins per debate (clamped to 1..=3).
    pub debate_rounds: u32,
    /// Wall-clock budget for a whole run before it is cancelled.
    pub run_deadline_secs: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            truncate_inputs: true,
            max_input_chars: 12_000,
            prompt_density: 1.0,
            call_timeout_secs: 30,
            max_retries: 2,
            backoff_base_ms: 1_000,
            debate_rounds: 1,
            run_deadline_secs: 120,
        }
    }
}

/// Per-request overrides; unset fields keep the process default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvaluationConfigOverride {
    pub truncate_inputs: Option<bool>,
    pub max_input_chars: Option<usize>,
    pub prompt_density: Option<f32>,
    pub call_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub debate_rounds: Option<u32>,
    pub run_deadline_secs: Option<u64>,
}

impl EvaluationConfig {
    pub fn with_override(&self, overrides: Option<&EvaluationConfigOverride>) -> Self {
        let Some(o) = overrides else {
            return self.clone();
        };
        Self {
            truncate_inputs: o.truncate_inputs.unwrap_or(self.truncate_inputs),
            max_input_chars: o.max_input_chars.unwrap_or(self.max_input_chars),
            prompt_density: o.prompt_density.unwrap_or(self.prompt_density),
            call_timeout_secs: o.call_timeout_secs.unwrap_or(self.call_timeout_secs),
            max_retries: o.max_retries.unwrap_or(self.max_retries),
            backoff_base_ms: o.backoff_base_ms.unwrap_or(self.backoff_base_ms),
            debate_rounds: o.debate_rounds.unwrap_or(self.debate_rounds),
            run_deadline_secs: o.run_deadline_secs.unwrap_or(self.run_deadline_secs),
        }
    }

    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(self.call_timeout_secs.max(1)),
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs.max(1))
    }

    pub fn rounds(&self) -> u32 {
        self.debate_rounds.clamp(1, 3)
    }

    /// Scales a base word budget by `prompt_density` (clamped to 0.25..=4.0).
    pub fn target_words(&self, base: usize) -> usize {
        let density = if self.prompt_density.is_finite() {
            self.prompt_density.clamp(0.25, 4.0)
        } else {
            1.0
        };
        ((base as f32) * density).round().max(1.0) as usize
    }

    /// Truncates on a char boundary when truncation is enabled.
    pub fn truncate<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let text = text.trim();
        if !self.truncate_inputs || text.chars().count() <= self.max_input_chars {
            return Cow::Borrowed(text);
        }
        let cut: String = text.chars().take(self.max_input_chars).collect();
        Cow::Owned(format!("{cut}\n[... ingekort]"))
    }
}
