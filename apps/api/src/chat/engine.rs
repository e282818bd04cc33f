//! ChatContinuationEngine: answers a follow-up question against one stored
//! result, either as a single persona or as the synthesized panel voice.
//!
//! Exactly one logical call per question. A failed call surfaces as
//! `ExternalCallFailed`; the engine never falls back to another persona.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chat::prompts;
use crate::config::EvaluationConfigOverride;
use crate::errors::AppError;
use crate::llm_client::policy::call_with_policy;
use crate::llm_client::CompletionRequest;
use crate::models::persona::is_panel_alias;
use crate::state::AppState;

/// Persona label of answers given by the whole panel.
pub const PANEL: &str = "panel";

/// Prior turns beyond this many are left out of the prompt.
const MAX_HISTORY_TURNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One message of a follow-up conversation. Never persisted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContinueRequest {
    pub question: String,
    /// Persona to answer as; absent, blank, "all" or "panel" means the panel.
    #[serde(default, alias = "persona_name")]
    pub persona: Option<String>,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(default)]
    pub config: Option<EvaluationConfigOverride>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub persona: String,
}

/// Named persona, or `None` for the panel voice.
fn requested_persona(persona: Option<&str>) -> Option<&str> {
    persona
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter(|p| !is_panel_alias(p))
}

pub async fn continue_chat(
    state: &AppState,
    result_id: Uuid,
    request: ContinueRequest,
    cancel: &CancellationToken,
) -> Result<ChatAnswer, AppError> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(AppError::Validation("question cannot be empty".to_string()));
    }

    let result = state
        .store
        .get(result_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Result {result_id} not found")))?;

    let config = state.config.evaluation.with_override(request.config.as_ref());

    let (system_prompt, speaker) = match requested_persona(request.persona.as_deref()) {
        Some(name) => {
            if !result.selected_personas.iter().any(|p| p == name) {
                return Err(AppError::Validation(format!(
                    "persona '{name}' did not take part in result {result_id}"
                )));
            }
            let persona = state
                .personas
                .get_persona(name)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Persona '{name}' not found")))?;
            (prompts::persona_system_prompt(&persona), name.to_string())
        }
        None => {
            let mut found = Vec::with_capacity(result.selected_personas.len());
            for name in &result.selected_personas {
                match state.personas.get_persona(name).await? {
                    Some(persona) => found.push(persona),
                    None => warn!("Persona '{name}' of result {result_id} is no longer configured"),
                }
            }
            (prompts::panel_system_prompt(&found), PANEL.to_string())
        }
    };

    let history_start = request.history.len().saturating_sub(MAX_HISTORY_TURNS);
    let context = prompts::chat_context(&result, &request.history[history_start..], &config);
    let completion_request = CompletionRequest::new(system_prompt, context, question);

    let llm = Arc::clone(&state.llm);
    let completion = call_with_policy(
        llm.as_ref(),
        &state.call_pool,
        &config.call_policy(),
        &completion_request,
        cancel,
        &speaker,
    )
    .await
    .map_err(|e| AppError::external(speaker.as_str(), &e))?;

    info!(
        "Answered follow-up on {} {} as '{}' in {}ms",
        result.result_type,
        result_id,
        speaker,
        completion.duration.as_millis()
    );

    Ok(ChatAnswer {
        answer: completion.text.trim().to_string(),
        persona: speaker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::fake::ScriptedLlm;
    use crate::llm_client::{ErrorKind, LlmError, LlmProvider};
    use crate::models::evaluation::{NewEvaluationResult, ResultData, WriteMode};
    use crate::models::persona::Persona;
    use crate::models::transcript::{TranscriptTurn, TurnRole};
    use crate::storage::{InMemoryResultStore, ResultStore};

    fn persona(name: &str, prompt: &str) -> Persona {
        Persona {
            id: Uuid::new_v4(),
            name: name.to_string(),
            display_name: name.to_uppercase(),
            system_prompt: prompt.to_string(),
            is_active: true,
        }
    }

    fn turn(speaker: &str, role: TurnRole, content: &str, sequence: u32) -> TranscriptTurn {
        TranscriptTurn {
            speaker: speaker.into(),
            role,
            content: content.into(),
            sequence,
        }
    }

    /// A stored hr/tech debate plus a state answering with `llm`.
    async fn setup(llm: Arc<ScriptedLlm>) -> (AppState, Uuid) {
        let store = Arc::new(InMemoryResultStore::with_personas(vec![
            persona("hr", "Je bent de HR-adviseur"),
            persona("tech", "Je bent de tech lead"),
            persona("legal", "Je bent jurist"),
        ]));
        let id = store
            .put(
                NewEvaluationResult {
                    candidate_id: "cand-1".into(),
                    job_id: "job-1".into(),
                    selected_personas: vec!["hr".into(), "tech".into()],
                    company_note: Some("Fintech".into()),
                    result_data: ResultData::Debate(vec![
                        turn("Moderator", TurnRole::Moderator, "Welkom", 1),
                        turn("hr", TurnRole::Persona, "Sterke communicatie", 2),
                        turn("tech", TurnRole::Persona, "Twijfel over Rust-ervaring", 3),
                        turn("Moderator", TurnRole::Moderator, "Twijfel", 4),
                    ]),
                    incomplete: false,
                    duration_ms: Some(4_000),
                },
                WriteMode::CreateOnly,
            )
            .await
            .unwrap();
        let llm: Arc<dyn LlmProvider> = llm;
        (AppState::for_tests(store, llm), id)
    }

    fn ask(question: &str, persona: Option<&str>) -> ContinueRequest {
        ContinueRequest {
            question: question.into(),
            persona: persona.map(String::from),
            history: Vec::new(),
            config: None,
        }
    }

    #[tokio::test]
    async fn test_answers_as_named_persona_with_debate_context() {
        let llm = Arc::new(ScriptedLlm::replying("  Ik blijf bij mijn oordeel.  "));
        let (state, id) = setup(llm.clone()).await;

        let answer = continue_chat(&state, id, ask("Waarom?", Some("hr")), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(answer.persona, "hr");
        assert_eq!(answer.answer, "Ik blijf bij mijn oordeel.");
        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].system_prompt.starts_with("Je bent de HR-adviseur"));
        assert!(calls[0].context.contains("**tech:** Twijfel over Rust-ervaring"));
        assert!(calls[0].context.contains("KANDIDAAT: cand-1"));
        assert_eq!(calls[0].question, "Waarom?");
    }

    #[tokio::test]
    async fn test_panel_voice_when_no_persona_given() {
        let llm = Arc::new(ScriptedLlm::replying("Het panel twijfelt."));
        let (state, id) = setup(llm.clone()).await;

        for persona in [None, Some("all"), Some("  ")] {
            let answer = continue_chat(&state, id, ask("Conclusie?", persona), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(answer.persona, PANEL);
        }

        let calls = llm.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].system_prompt.contains("HR (hr)"));
        assert!(calls[0].system_prompt.contains("TECH (tech)"));
        assert!(!calls[0].system_prompt.contains("jurist"));
    }

    #[tokio::test]
    async fn test_unknown_result_is_not_found() {
        let llm = Arc::new(ScriptedLlm::replying("x"));
        let (state, _) = setup(llm.clone()).await;

        let err = continue_chat(&state, Uuid::new_v4(), ask("Waarom?", None), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_persona_outside_the_run_is_rejected() {
        let llm = Arc::new(ScriptedLlm::replying("x"));
        let (state, id) = setup(llm.clone()).await;

        let err = continue_chat(&state, id, ask("Waarom?", Some("legal")), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_question_is_rejected() {
        let llm = Arc::new(ScriptedLlm::replying("x"));
        let (state, id) = setup(llm).await;

        let err = continue_chat(&state, id, ask("   ", None), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_failed_call_surfaces_without_fallback() {
        let llm = Arc::new(ScriptedLlm::failing(|| LlmError::Api {
            status: 400,
            message: "bad".into(),
        }));
        let (state, id) = setup(llm.clone()).await;

        let err = continue_chat(&state, id, ask("Waarom?", Some("tech")), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            AppError::ExternalCallFailed { kind, target, .. } => {
                assert_eq!(kind, ErrorKind::Invalid);
                assert_eq!(target, "tech");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_recent_history_is_part_of_the_context() {
        let llm = Arc::new(ScriptedLlm::replying("ok"));
        let (state, id) = setup(llm.clone()).await;
        let mut request = ask("En nu?", None);
        request.history = vec![
            ChatTurn {
                role: ChatRole::User,
                content: "Is de kandidaat senior?".into(),
                persona: None,
            },
            ChatTurn {
                role: ChatRole::Assistant,
                content: "Medior tot senior.".into(),
                persona: Some("tech".into()),
            },
        ];

        continue_chat(&state, id, request, &CancellationToken::new()).await.unwrap();

        let context = &llm.calls()[0].context;
        assert!(context.contains("Gebruiker: Is de kandidaat senior?"));
        assert!(context.contains("tech: Medior tot senior."));
    }
}
