//! DebateOrchestrator: drives one moderated debate through
//! `INIT → OPEN → TURN(persona_i)… → CLOSE → DONE`, or `ABORTED` when the
//! moderator cannot open or close.
//!
//! A persona that fails after retries gets a `[no response]` turn and the
//! debate continues. A moderator failure ends the run; the partial transcript
//! is still returned, flagged `incomplete`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{EvaluationConfig, EvaluationConfigOverride};
use crate::debate::prompts::{self, MODERATOR, NO_RESPONSE};
use crate::errors::AppError;
use crate::llm_client::policy::{call_with_policy, CallPolicy};
use crate::llm_client::pool::CallPool;
use crate::llm_client::{CompletionRequest, LlmError, LlmProvider};
use crate::models::evaluation::{NewEvaluationResult, ResultData, ResultType, RunKey, WriteMode};
use crate::models::materials::{CandidateMaterials, JobMaterials, RunMaterials};
use crate::models::persona::PersonaSet;
use crate::models::transcript::{TranscriptBuilder, TranscriptTurn, TurnRole};
use crate::state::AppState;
use crate::storage::ensure_writable;

// ────────────────────────────────────────────────────────────────────────────
// Data models
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateState {
    Init,
    Open,
    Turn,
    Close,
    Done,
    Aborted,
}

/// Result of one debate run, before persistence.
#[derive(Debug, Clone)]
pub struct DebateOutcome {
    pub transcript: Vec<TranscriptTurn>,
    /// Exact prompt of the last call made, for auditing.
    pub full_prompt: String,
    pub incomplete: bool,
    /// `Done` or `Aborted`.
    pub state: DebateState,
    pub abort_reason: Option<String>,
    pub duration: Duration,
}

/// Request body for a debate run.
#[derive(Debug, Clone, Deserialize)]
pub struct DebateRequest {
    pub candidate: CandidateMaterials,
    pub job: JobMaterials,
    /// `persona_name → prompt`; also the speaking order.
    pub personas: PersonaSet,
    #[serde(default)]
    pub company_note: Option<String>,
    #[serde(default)]
    pub config: Option<EvaluationConfigOverride>,
    #[serde(default)]
    pub write_mode: WriteMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebateResponse {
    /// Absent when the debate aborted before any turn was recorded.
    pub result_id: Option<Uuid>,
    pub transcript: Vec<TranscriptTurn>,
    pub full_prompt: String,
    pub incomplete: bool,
    pub state: DebateState,
    pub abort_reason: Option<String>,
    pub duration_ms: i64,
}

// ────────────────────────────────────────────────────────────────────────────
// State machine
// ────────────────────────────────────────────────────────────────────────────

pub struct DebateOrchestrator<'a> {
    llm: &'a dyn LlmProvider,
    pool: &'a CallPool,
    config: &'a EvaluationConfig,
    policy: CallPolicy,
}

/// Mutable state of one run. Lives only for the duration of `run`.
struct DebateRun {
    state: DebateState,
    transcript: TranscriptBuilder,
    full_prompt: String,
    started: Instant,
}

impl DebateRun {
    fn enter(&mut self, next: DebateState) {
        debug!("Debate {:?} → {:?}", self.state, next);
        self.state = next;
    }

    fn finish(mut self, abort_reason: Option<String>) -> DebateOutcome {
        let state = if abort_reason.is_some() {
            DebateState::Aborted
        } else {
            DebateState::Done
        };
        self.enter(state);
        DebateOutcome {
            transcript: self.transcript.into_turns(),
            full_prompt: self.full_prompt,
            incomplete: abort_reason.is_some(),
            state,
            abort_reason,
            duration: self.started.elapsed(),
        }
    }
}

impl<'a> DebateOrchestrator<'a> {
    pub fn new(llm: &'a dyn LlmProvider, pool: &'a CallPool, config: &'a EvaluationConfig) -> Self {
        Self {
            llm,
            pool,
            config,
            policy: config.call_policy(),
        }
    }

    /// Runs the debate to `Done` or `Aborted`. Never fails: degraded runs are
    /// reported through `incomplete` and `abort_reason`.
    pub async fn run(
        &self,
        personas: &PersonaSet,
        materials: &RunMaterials,
        cancel: &CancellationToken,
    ) -> DebateOutcome {
        let mut run = DebateRun {
            state: DebateState::Init,
            transcript: TranscriptBuilder::new(),
            full_prompt: String::new(),
            started: Instant::now(),
        };
        let context = materials.render_context(self.config);
        let panel = personas.names();
        let moderator_system = prompts::moderator_system_prompt();

        run.enter(DebateState::Open);
        let request = CompletionRequest::new(
            moderator_system.clone(),
            prompts::debate_context(&context, run.transcript.turns()),
            prompts::open_question(&panel, self.config),
        );
        match self.call(&mut run, &request, cancel, "moderator (open)").await {
            Ok(text) => {
                run.transcript.push(MODERATOR, TurnRole::Moderator, &text);
            }
            Err(e) => return self.abort(run, "open", &e),
        }

        for round in 1..=self.config.rounds() {
            for persona in personas.iter() {
                run.enter(DebateState::Turn);
                let name = persona.name.trim();
                let request = CompletionRequest::new(
                    prompts::persona_system_prompt(&persona.prompt),
                    prompts::debate_context(&context, run.transcript.turns()),
                    prompts::turn_question(name, round, self.config),
                );
                match self.call(&mut run, &request, cancel, name).await {
                    Ok(text) => {
                        run.transcript.push(name, TurnRole::Persona, &text);
                    }
                    Err(LlmError::Cancelled) => {
                        return self.abort(run, "turn", &LlmError::Cancelled);
                    }
                    Err(e) => {
                        warn!("Persona '{name}' gave no response in round {round}: {e}");
                        run.transcript.push(name, TurnRole::Persona, NO_RESPONSE);
                    }
                }
            }
        }

        run.enter(DebateState::Close);
        let request = CompletionRequest::new(
            moderator_system,
            prompts::debate_context(&context, run.transcript.turns()),
            prompts::close_question(self.config),
        );
        match self.call(&mut run, &request, cancel, "moderator (close)").await {
            Ok(text) => {
                run.transcript.push(MODERATOR, TurnRole::Moderator, &text);
            }
            Err(e) => return self.abort(run, "close", &e),
        }

        let outcome = run.finish(None);
        info!(
            "Debate finished in {}ms with {} turns",
            outcome.duration.as_millis(),
            outcome.transcript.len()
        );
        outcome
    }

    /// Records the prompt as the latest `full_prompt`, then calls under policy.
    async fn call(
        &self,
        run: &mut DebateRun,
        request: &CompletionRequest,
        cancel: &CancellationToken,
        label: &str,
    ) -> Result<String, LlmError> {
        run.full_prompt = request.render();
        call_with_policy(self.llm, self.pool, &self.policy, request, cancel, label)
            .await
            .map(|completion| completion.text)
    }

    fn abort(&self, run: DebateRun, stage: &str, err: &LlmError) -> DebateOutcome {
        let reason = match err {
            LlmError::Cancelled => format!("debate cancelled during {stage}"),
            other => format!("moderator {stage} failed ({}): {other}", other.kind()),
        };
        error!("Debate aborted after {} turns: {reason}", run.transcript.len());
        run.finish(Some(reason))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RunDebate operation
// ────────────────────────────────────────────────────────────────────────────

/// Validates, runs, persists and reports one debate. Aborted debates are
/// stored too (flagged incomplete) as long as at least one turn exists.
pub async fn run_debate(
    state: &AppState,
    request: DebateRequest,
    cancel: &CancellationToken,
) -> Result<DebateResponse, AppError> {
    request.personas.validate()?;
    if let Some(clash) = request
        .personas
        .names()
        .into_iter()
        .find(|n| n.eq_ignore_ascii_case(MODERATOR))
    {
        return Err(AppError::Validation(format!(
            "'{clash}' is reserved for the debate moderator"
        )));
    }
    let materials = RunMaterials::new(request.candidate, request.job, request.company_note);
    materials.validate()?;

    let selected = request.personas.names();
    let key = RunKey::new(
        &materials.candidate.candidate_id,
        &materials.job.job_id,
        ResultType::Debate,
        &selected,
    );
    ensure_writable(state.store.as_ref(), &key, request.write_mode).await?;

    let config = state.config.evaluation.with_override(request.config.as_ref());
    info!(
        "Starting debate on candidate {} for job {} with {} personas, {} round(s)",
        materials.candidate.candidate_id,
        materials.job.job_id,
        selected.len(),
        config.rounds()
    );

    let llm = Arc::clone(&state.llm);
    let outcome = DebateOrchestrator::new(llm.as_ref(), &state.call_pool, &config)
        .run(&request.personas, &materials, cancel)
        .await;
    let duration_ms = outcome.duration.as_millis() as i64;

    let result_id = if outcome.transcript.is_empty() {
        warn!("Debate produced no turns, nothing stored");
        None
    } else {
        let id = state
            .store
            .put(
                NewEvaluationResult {
                    candidate_id: materials.candidate.candidate_id.clone(),
                    job_id: materials.job.job_id.clone(),
                    selected_personas: selected,
                    company_note: materials.company_note.clone(),
                    result_data: ResultData::Debate(outcome.transcript.clone()),
                    incomplete: outcome.incomplete,
                    duration_ms: Some(duration_ms),
                },
                request.write_mode,
            )
            .await?;
        Some(id)
    };

    Ok(DebateResponse {
        result_id,
        transcript: outcome.transcript,
        full_prompt: outcome.full_prompt,
        incomplete: outcome.incomplete,
        state: outcome.state,
        abort_reason: outcome.abort_reason,
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
                candidate_id: "cand-7".into(),
                text: "Product owner met tien jaar ervaring".into(),
            },
            JobMaterials {
                job_id: "job-3".into(),
                text: "Senior product manager".into(),
            },
            Some("Remote-first bedrijf".into()),
        )
    }

    fn is_moderator(request: &CompletionRequest) -> bool {
        request.system_prompt.contains("moderator van een selectiepanel")
    }

    fn rate_limited() -> LlmError {
        LlmError::Api {
            status: 429,
            message: "rate limited".into(),
        }
    }

    /// Moderator and personas answer; personas whose prompt starts with
    /// "BROKEN" always fail, and the closing call fails when `close_fails`.
    fn panel_llm(close_fails: bool) -> ScriptedLlm {
        ScriptedLlm::new(move |request| {
            if is_moderator(request) {
                if request.question.starts_with("Sluit") {
                    if close_fails {
                        return Err(rate_limited());
                    }
                    return Ok("Samenvatting: Twijfel".into());
                }
                return Ok("Welkom bij het panel".into());
            }
            if request.system_prompt.starts_with("BROKEN") {
                return Err(rate_limited());
            }
            Ok(format!("Mijn oordeel vanuit {}", request.system_prompt.lines().next().unwrap_or("")))
        })
    }

    fn roles(turns: &[TranscriptTurn]) -> Vec<(&str, TurnRole)> {
        turns.iter().map(|t| (t.speaker.as_str(), t.role)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_persona_debate_alternates_moderator_and_persona() {
        let llm = panel_llm(false);
        let config = EvaluationConfig::default();
        let pool = CallPool::new(2);
        let personas = PersonaSet::from_pairs([("hr", "HR prompt")]);

        let outcome = DebateOrchestrator::new(&llm, &pool, &config)
            .run(&personas, &materials(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, DebateState::Done);
        assert!(!outcome.incomplete);
        assert_eq!(
            roles(&outcome.transcript),
            vec![
                (MODERATOR, TurnRole::Moderator),
                ("hr", TurnRole::Persona),
                (MODERATOR, TurnRole::Moderator),
            ]
        );
        assert!(outcome.full_prompt.contains("Sluit het panelgesprek af"));
        assert!(outcome.full_prompt.contains("**hr:**"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_persona_gets_no_response_turn_and_debate_completes() {
        let llm = panel_llm(false);
        let config = EvaluationConfig::default();
        let pool = CallPool::new(2);
        let personas = PersonaSet::from_pairs([("hr", "HR prompt"), ("manager", "BROKEN manager")]);

        let outcome = DebateOrchestrator::new(&llm, &pool, &config)
            .run(&personas, &materials(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, DebateState::Done);
        assert!(!outcome.incomplete);
        assert!(outcome
            .transcript
            .iter()
            .any(|t| t.speaker == "manager" && t.content == NO_RESPONSE));
        let manager_calls = llm
            .calls()
            .iter()
            .filter(|r| r.system_prompt.starts_with("BROKEN"))
            .count();
        assert_eq!(manager_calls, 3);
        assert_eq!(outcome.transcript.last().map(|t| t.role), Some(TurnRole::Moderator));
    }

    #[tokio::test(start_paused = true)]
    async fn test_moderator_close_failure_aborts_with_partial_transcript() {
        let llm = panel_llm(true);
        let config = EvaluationConfig::default();
        let pool = CallPool::new(2);
        let personas = PersonaSet::from_pairs([("hr", "HR prompt")]);

        let outcome = DebateOrchestrator::new(&llm, &pool, &config)
            .run(&personas, &materials(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, DebateState::Aborted);
        assert!(outcome.incomplete);
        assert_eq!(outcome.transcript.len(), 2);
        assert!(outcome.abort_reason.unwrap().contains("close"));
        assert!(outcome.full_prompt.contains("Sluit het panelgesprek af"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_moderator_open_failure_aborts_without_turns() {
        let llm = ScriptedLlm::failing(rate_limited);
        let config = EvaluationConfig::default();
        let pool = CallPool::new(2);
        let personas = PersonaSet::from_pairs([("hr", "HR prompt")]);

        let outcome = DebateOrchestrator::new(&llm, &pool, &config)
            .run(&personas, &materials(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, DebateState::Aborted);
        assert!(outcome.transcript.is_empty());
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extra_rounds_repeat_the_round_robin() {
        let llm = panel_llm(false);
        let config = EvaluationConfig {
            debate_rounds: 2,
            ..Default::default()
        };
        let pool = CallPool::new(2);
        let personas = PersonaSet::from_pairs([("hr", "HR prompt"), ("tech", "TECH prompt")]);

        let outcome = DebateOrchestrator::new(&llm, &pool, &config)
            .run(&personas, &materials(), &CancellationToken::new())
            .await;

        let speakers: Vec<&str> = outcome.transcript.iter().map(|t| t.speaker.as_str()).collect();
        assert_eq!(speakers, vec![MODERATOR, "hr", "tech", "hr", "tech", MODERATOR]);
        let sequences: Vec<u32> = outcome.transcript.iter().map(|t| t.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_persona_turn_aborts_and_keeps_turns() {
        // Every call takes 10s: the opening lands at t=10, hr is mid-call at t=15.
        let llm = panel_llm(false).with_delay(Duration::from_secs(10));
        let config = EvaluationConfig::default();
        let pool = CallPool::new(2);
        let personas = PersonaSet::from_pairs([("hr", "HR prompt"), ("tech", "TECH prompt")]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            trigger.cancel();
        });

        let outcome = DebateOrchestrator::new(&llm, &pool, &config)
            .run(&personas, &materials(), &cancel)
            .await;

        assert_eq!(outcome.state, DebateState::Aborted);
        assert!(outcome.incomplete);
        let reason = outcome.abort_reason.unwrap();
        assert!(reason.contains("cancelled"), "reason was {reason}");
        assert_eq!(
            roles(&outcome.transcript),
            vec![(MODERATOR, TurnRole::Moderator)]
        );
        assert_eq!(outcome.transcript[0].content, "Welkom bij het panel");
        // tech never got a turn.
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persona_turn_sees_transcript_and_company_note() {
        let llm = panel_llm(false);
        let config = EvaluationConfig::default();
        let pool = CallPool::new(2);
        let personas = PersonaSet::from_pairs([("hr", "HR prompt")]);

        DebateOrchestrator::new(&llm, &pool, &config)
            .run(&personas, &materials(), &CancellationToken::new())
            .await;

        let calls = llm.calls();
        let turn = &calls[1];
        assert!(turn.system_prompt.starts_with("HR prompt"));
        assert!(turn.context.contains("**Moderator:** Welkom bij het panel"));
        assert!(turn.context.contains("Remote-first bedrijf"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_debate_stores_transcript() {
        let store = Arc::new(InMemoryResultStore::new());
        let state = AppState::for_tests(store.clone(), Arc::new(panel_llm(false)));
        let m = materials();
        let request = DebateRequest {
            candidate: m.candidate,
            job: m.job,
            personas: PersonaSet::from_pairs([("hr", "HR prompt")]),
            company_note: m.company_note,
            config: None,
            write_mode: WriteMode::CreateOnly,
        };

        let response = run_debate(&state, request, &CancellationToken::new()).await.unwrap();
        let id = response.result_id.unwrap();
        let stored = store.get(id).await.unwrap().unwrap();

        assert_eq!(stored.result_type, ResultType::Debate);
        assert_eq!(stored.transcript().unwrap(), response.transcript.as_slice());
        assert!(!stored.incomplete);
    }

    #[tokio::test]
    async fn test_persona_named_moderator_is_rejected() {
        let store = Arc::new(InMemoryResultStore::new());
        let state = AppState::for_tests(store, Arc::new(panel_llm(false)));
        let m = materials();
        let request = DebateRequest {
            candidate: m.candidate,
            job: m.job,
            personas: PersonaSet::from_pairs([("moderator", "Ik modereer")]),
            company_note: None,
            config: None,
            write_mode: WriteMode::CreateOnly,
        };

        let err = run_debate(&state, request, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
