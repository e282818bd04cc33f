//! Evaluation runner: fans the persona calls of one run out over the shared
//! call pool, collects verdicts as they complete and hands them to the
//! aggregator.
//!
//! Flow: validate → write-mode pre-check → parallel persona calls → aggregate
//! → persist → respond.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{EvaluationConfig, EvaluationConfigOverride};
use crate::errors::AppError;
use crate::evaluation::{aggregator, prompts, verdict};
use crate::llm_client::policy::call_with_policy;
use crate::llm_client::pool::CallPool;
use crate::llm_client::{CompletionRequest, ErrorKind, LlmError, LlmProvider};
use crate::models::evaluation::{
    EvaluationOutcome, NewEvaluationResult, PersonaVerdict, RecommendationBucket, ResultData,
    RunKey, ResultType, WriteMode,
};
use crate::models::materials::{CandidateMaterials, JobMaterials, RunMaterials};
use crate::models::persona::PersonaSet;
use crate::state::AppState;
use crate::storage::ensure_writable;

// ────────────────────────────────────────────────────────────────────────────
// Data models
// ────────────────────────────────────────────────────────────────────────────

/// Request body for an evaluation run.
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluateRequest {
    pub candidate: CandidateMaterials,
    pub job: JobMaterials,
    /// `persona_name → prompt`, in the order the panel should be reported.
    pub personas: PersonaSet,
    #[serde(default)]
    pub company_note: Option<String>,
    #[serde(default)]
    pub config: Option<EvaluationConfigOverride>,
    #[serde(default)]
    pub write_mode: WriteMode,
}

/// A persona whose call did not produce a verdict. Its absence from
/// `evaluations` is the signal; this only says why.
#[derive(Debug, Clone, Serialize)]
pub struct PersonaFailure {
    pub persona: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluateResponse {
    pub result_id: Uuid,
    pub evaluations: BTreeMap<String, PersonaVerdict>,
    pub combined_score: Option<f64>,
    pub combined_recommendation: String,
    pub combined_analysis: String,
    pub recommendation_bucket: RecommendationBucket,
    /// Cancelled before every persona answered.
    pub partial: bool,
    pub failed_personas: Vec<PersonaFailure>,
    pub duration_ms: i64,
}

/// Outcome of the parallel phase, before persistence.
#[derive(Debug, Clone)]
pub struct EvaluationRun {
    pub outcome: EvaluationOutcome,
    pub failures: Vec<PersonaFailure>,
    pub duration: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
// Parallel persona phase
// ────────────────────────────────────────────────────────────────────────────

/// Calls every persona in parallel and aggregates the verdicts.
///
/// Each call takes a permit from `pool`, so the pool bounds concurrency
/// across all runs in the process. When `cancel` fires the verdicts that have
/// already arrived are aggregated with `partial: true` and stragglers are
/// aborted.
pub async fn run_evaluation(
    llm: Arc<dyn LlmProvider>,
    pool: &CallPool,
    personas: &PersonaSet,
    materials: &RunMaterials,
    config: &EvaluationConfig,
    cancel: &CancellationToken,
) -> Result<EvaluationRun, AppError> {
    let started = Instant::now();
    let context = materials.render_context(config);
    let question = prompts::verdict_question(config);
    let policy = config.call_policy();

    let mut tasks: JoinSet<(String, Result<PersonaVerdict, LlmError>)> = JoinSet::new();
    // Task id → persona, so a task that panics still gets reported by name.
    let mut task_names: HashMap<task::Id, String> = HashMap::new();
    for persona in personas.iter() {
        let name = persona.name.trim().to_string();
        let request = CompletionRequest::new(
            prompts::verdict_system_prompt(&persona.prompt),
            context.clone(),
            question.clone(),
        );
        let llm = Arc::clone(&llm);
        let pool = pool.clone();
        let policy = policy.clone();
        let cancel = cancel.clone();

        let handle = tasks.spawn({
            let name = name.clone();
            async move {
                let result = call_with_policy(llm.as_ref(), &pool, &policy, &request, &cancel, &name)
                    .await
                    .and_then(|completion| verdict::parse_verdict(&name, &completion.text));
                (name, result)
            }
        });
        task_names.insert(handle.id(), name);
    }

    let mut verdicts: HashMap<String, PersonaVerdict> = HashMap::new();
    let mut failures: Vec<PersonaFailure> = Vec::new();
    let mut partial = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                partial = true;
                tasks.abort_all();
                break;
            }
            next = tasks.join_next_with_id() => {
                match next {
                    None => break,
                    Some(Ok((_, (name, Ok(verdict))))) => {
                        verdicts.insert(name, verdict);
                    }
                    Some(Ok((_, (name, Err(e))))) => {
                        warn!("Persona '{name}' produced no verdict: {e}");
                        failures.push(PersonaFailure {
                            persona: name,
                            kind: e.kind(),
                            message: e.to_string(),
                        });
                    }
                    Some(Err(e)) => {
                        let name = task_names.remove(&e.id()).unwrap_or_default();
                        error!("Persona '{name}' task did not complete: {e}");
                        failures.push(PersonaFailure {
                            persona: name,
                            kind: ErrorKind::Invalid,
                            message: "persona task panicked".to_string(),
                        });
                    }
                }
            }
        }
    }

    let selected = personas.names();
    if partial {
        for name in &selected {
            let settled = verdicts.contains_key(name) || failures.iter().any(|f| &f.persona == name);
            if !settled {
                failures.push(PersonaFailure {
                    persona: name.clone(),
                    kind: ErrorKind::Timeout,
                    message: "cancelled before the persona answered".to_string(),
                });
            }
        }
    }

    let outcome = aggregator::aggregate(&selected, verdicts, partial)?;
    let duration = started.elapsed();
    info!(
        "Evaluation finished in {}ms: {}/{} verdicts, combined score {:?}{}",
        duration.as_millis(),
        outcome.evaluations.len(),
        selected.len(),
        outcome.combined.combined_score,
        if partial { " (partial)" } else { "" }
    );

    Ok(EvaluationRun {
        outcome,
        failures,
        duration,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Evaluate operation
// ────────────────────────────────────────────────────────────────────────────

/// Validates, runs, persists and reports one evaluation.
pub async fn evaluate(
    state: &AppState,
    request: EvaluateRequest,
    cancel: &CancellationToken,
) -> Result<EvaluateResponse, AppError> {
    request.personas.validate()?;
    let materials = RunMaterials::new(request.candidate, request.job, request.company_note);
    materials.validate()?;

    let selected = request.personas.names();
    let key = RunKey::new(
        &materials.candidate.candidate_id,
        &materials.job.job_id,
        ResultType::Evaluation,
        &selected,
    );
    ensure_writable(state.store.as_ref(), &key, request.write_mode).await?;

    let config = state.config.evaluation.with_override(request.config.as_ref());
    info!(
        "Evaluating candidate {} for job {} with {} personas",
        materials.candidate.candidate_id,
        materials.job.job_id,
        selected.len()
    );

    let run = run_evaluation(
        Arc::clone(&state.llm),
        &state.call_pool,
        &request.personas,
        &materials,
        &config,
        cancel,
    )
    .await?;

    let duration_ms = run.duration.as_millis() as i64;
    let result_id = state
        .store
        .put(
            NewEvaluationResult {
                candidate_id: materials.candidate.candidate_id.clone(),
                job_id: materials.job.job_id.clone(),
                selected_personas: selected,
                company_note: materials.company_note.clone(),
                result_data: ResultData::Evaluation(run.outcome.clone()),
                incomplete: run.outcome.partial,
                duration_ms: Some(duration_ms),
            },
            request.write_mode,
        )
        .await?;

    let EvaluationOutcome {
        evaluations,
        combined,
        partial,
    } = run.outcome;

    Ok(EvaluateResponse {
        result_id,
        evaluations,
        combined_score: combined.combined_score,
        combined_recommendation: combined.combined_recommendation,
        combined_analysis: combined.combined_analysis,
        recommendation_bucket: combined.recommendation_bucket,
        partial,
        failed_personas: run.failures,
        duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::fake::ScriptedLlm;
    use crate::storage::{InMemoryResultStore, ResultStore};

    fn materials() -> RunMaterials {
        RunMaterials::new(
            CandidateMaterials {
                candidate_id: "cand-1".into(),
                text: "Ervaren backend developer".into(),
            },
            JobMaterials {
                job_id: "job-1".into(),
                text: "Rust engineer".into(),
            },
            None,
        )
    }

    fn fast_config() -> EvaluationConfig {
        EvaluationConfig {
            backoff_base_ms: 0,
            ..Default::default()
        }
    }

    /// Answers per persona, keyed on the persona prompt.
    fn per_persona_llm() -> ScriptedLlm {
        ScriptedLlm::new(|request| {
            if request.system_prompt.starts_with("HR") {
                Ok(r#"{"score": 8, "analysis": "Goede communicatie", "recommendation": "Sterk aanbevelen"}"#.into())
            } else if request.system_prompt.starts_with("MANAGER") {
                Ok(r#"{"score": 4, "analysis": "Weinig leiding gegeven", "recommendation": "Twijfel"}"#.into())
            } else {
                Err(LlmError::Api {
                    status: 400,
                    message: "bad request".into(),
                })
            }
        })
    }

    fn request(personas: PersonaSet) -> EvaluateRequest {
        let m = materials();
        EvaluateRequest {
            candidate: m.candidate,
            job: m.job,
            personas,
            company_note: Some("Scale-up".into()),
            config: None,
            write_mode: WriteMode::CreateOnly,
        }
    }

    #[tokio::test]
    async fn test_parallel_run_aggregates_in_selected_order() {
        let llm: Arc<dyn LlmProvider> = Arc::new(per_persona_llm());
        let personas = PersonaSet::from_pairs([("manager", "MANAGER prompt"), ("hr", "HR prompt")]);

        let run = run_evaluation(
            llm,
            &CallPool::new(6),
            &personas,
            &materials(),
            &fast_config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(run.outcome.combined.combined_score, Some(6.0));
        assert_eq!(run.outcome.combined.recommendation_bucket, RecommendationBucket::Positive);
        let analysis = &run.outcome.combined.combined_analysis;
        assert!(analysis.find("**manager**").unwrap() < analysis.find("**hr**").unwrap());
        assert!(run.failures.is_empty());
        assert!(!run.outcome.partial);
    }

    #[tokio::test]
    async fn test_failed_persona_is_omitted_not_fatal() {
        let llm: Arc<dyn LlmProvider> = Arc::new(per_persona_llm());
        let personas = PersonaSet::from_pairs([("hr", "HR prompt"), ("legal", "LEGAL prompt")]);

        let run = run_evaluation(
            llm,
            &CallPool::new(6),
            &personas,
            &materials(),
            &fast_config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(run.outcome.evaluations.len(), 1);
        assert!(!run.outcome.evaluations.contains_key("legal"));
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].persona, "legal");
        assert_eq!(run.failures[0].kind, ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn test_panicking_persona_task_is_reported_as_failure() {
        let llm: Arc<dyn LlmProvider> = Arc::new(ScriptedLlm::new(|request| {
            if request.system_prompt.starts_with("CRASH") {
                panic!("provider blew up");
            }
            Ok(r#"{"score": 7, "analysis": "Solide", "recommendation": "Aanbevolen"}"#.into())
        }));
        let personas = PersonaSet::from_pairs([("hr", "HR prompt"), ("tech", "CRASH prompt")]);

        let run = run_evaluation(
            llm,
            &CallPool::new(6),
            &personas,
            &materials(),
            &fast_config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(run.outcome.evaluations.len(), 1);
        assert!(run.outcome.evaluations.contains_key("hr"));
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].persona, "tech");
        assert_eq!(run.failures[0].kind, ErrorKind::Invalid);
        assert!(!run.outcome.partial);
    }

    #[tokio::test]
    async fn test_all_failed_is_an_error() {
        let llm: Arc<dyn LlmProvider> = Arc::new(ScriptedLlm::replying("   "));
        let personas = PersonaSet::from_pairs([("hr", "HR prompt")]);

        let err = run_evaluation(
            llm,
            &CallPool::new(6),
            &personas,
            &materials(),
            &fast_config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::AllPersonasFailed));
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrent_calls() {
        let scripted = Arc::new(
            ScriptedLlm::replying(r#"{"score": 5, "analysis": "ok", "recommendation": "Twijfel"}"#)
                .with_delay(Duration::from_millis(20)),
        );
        let llm: Arc<dyn LlmProvider> = scripted.clone();
        let names: Vec<String> = (0..8).map(|i| format!("p{i}")).collect();
        let personas = PersonaSet::from_pairs(names.iter().map(|n| (n.as_str(), "prompt")));

        let run = run_evaluation(
            llm,
            &CallPool::new(3),
            &personas,
            &materials(),
            &fast_config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(run.outcome.evaluations.len(), 8);
        assert!(scripted.peak_concurrency() <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_returns_partial_verdicts() {
        let llm: Arc<dyn LlmProvider> = Arc::new(
            ScriptedLlm::new(|request| {
                if request.system_prompt.starts_with("FAST") {
                    Ok(r#"{"score": 7, "analysis": "snel", "recommendation": "Uitnodigen"}"#.into())
                } else {
                    Err(LlmError::Api {
                        status: 429,
                        message: "rate limited".into(),
                    })
                }
            })
            .with_delay(Duration::from_secs(1)),
        );
        let personas = PersonaSet::from_pairs([("fast", "FAST prompt"), ("slow", "SLOW prompt")]);
        // The slow persona is still in its 10s backoff when the run is cancelled.
        let config = EvaluationConfig {
            backoff_base_ms: 10_000,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        let run = run_evaluation(
            llm,
            &CallPool::new(6),
            &personas,
            &materials(),
            &config,
            &cancel,
        )
        .await
        .unwrap();

        assert!(run.outcome.partial);
        assert_eq!(run.outcome.evaluations.len(), 1);
        assert!(run.outcome.evaluations.contains_key("fast"));
        assert!(run.failures.iter().any(|f| f.persona == "slow"));
    }

    #[tokio::test]
    async fn test_evaluate_persists_and_respects_create_only() {
        let store = Arc::new(InMemoryResultStore::new());
        let state = AppState::for_tests(store.clone(), Arc::new(per_persona_llm()));
        let personas = PersonaSet::from_pairs([("hr", "HR prompt"), ("manager", "MANAGER prompt")]);

        let response = evaluate(&state, request(personas.clone()), &CancellationToken::new())
            .await
            .unwrap();
        let stored = store.get(response.result_id).await.unwrap().unwrap();
        assert_eq!(stored.result_type, ResultType::Evaluation);
        assert_eq!(stored.selected_personas, vec!["hr", "manager"]);
        assert_eq!(stored.company_note.as_deref(), Some("Scale-up"));
        assert!(stored.duration_ms.is_some());

        let err = evaluate(&state, request(personas), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists { existing_id } if existing_id == response.result_id));
    }

    #[tokio::test]
    async fn test_evaluate_rejects_empty_persona_set() {
        let store = Arc::new(InMemoryResultStore::new());
        let llm = Arc::new(per_persona_llm());
        let state = AppState::for_tests(store, llm.clone());

        let err = evaluate(&state, request(PersonaSet::default()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NoPersonasSelected));
        assert_eq!(llm.call_count(), 0);
    }
}
