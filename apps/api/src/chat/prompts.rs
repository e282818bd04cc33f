// LLM prompt constants for chat continuation.
// Reuses cross-cutting fragments from llm_client::prompts.

use crate::chat::engine::{ChatRole, ChatTurn};
use crate::config::EvaluationConfig;
use crate::llm_client::prompts::with_house_rules;
use crate::models::evaluation::{EvaluationResult, ResultType};
use crate::models::persona::Persona;

/// Characters of each persona prompt carried into the panel voice.
const PANEL_PROMPT_EXCERPT: usize = 600;

const PANEL_SYSTEM: &str = "\
    Je spreekt namens het voltallige selectiepanel. Beantwoord vervolgvragen \
    evenwichtig: benoem waar de panelleden het eens zijn, waar hun perspectieven \
    uiteenlopen en vanuit welke rol een argument komt. Kies geen partij die het \
    panel niet zelf heeft gekozen.";

const FOLLOW_UP_INSTRUCTION: &str = "\
    Beantwoord de vraag van de gebruiker op basis van het eerdere panelresultaat hieronder. \
    Blijf consistent met wat er eerder gezegd is, tenzij de vraag om een herziening vraagt.";

pub fn persona_system_prompt(persona: &Persona) -> String {
    with_house_rules(&format!("{}\n\n{}", persona.system_prompt.trim(), FOLLOW_UP_INSTRUCTION))
}

/// Neutral panel voice synthesized from the prompts of every persona found.
pub fn panel_system_prompt(personas: &[Persona]) -> String {
    let mut prompt = format!("{PANEL_SYSTEM}\n\n{FOLLOW_UP_INSTRUCTION}\n\nPERSPECTIEVEN IN HET PANEL:");
    for persona in personas {
        let excerpt: String = persona
            .system_prompt
            .trim()
            .chars()
            .take(PANEL_PROMPT_EXCERPT)
            .collect();
        prompt.push_str(&format!(
            "\n- {} ({}): {}",
            persona.display_name, persona.name, excerpt
        ));
    }
    with_house_rules(&prompt)
}

/// Stored result plus identifiers and the recent conversation.
pub fn chat_context(
    result: &EvaluationResult,
    history: &[ChatTurn],
    config: &EvaluationConfig,
) -> String {
    let mut context = format!(
        "KANDIDAAT: {}\nVACATURE: {}\nPANEL: {}\n",
        result.candidate_id,
        result.job_id,
        result.selected_personas.join(", ")
    );
    if let Some(note) = &result.company_note {
        context.push_str(&format!("BEDRIJFSNOTITIE: {}\n", config.truncate(note)));
    }

    let heading = match result.result_type {
        ResultType::Debate => "TRANSCRIPT VAN HET PANELGESPREK",
        ResultType::Evaluation => "PANELEVALUATIE",
    };
    context.push_str(&format!(
        "\n{}{}:\n{}\n",
        heading,
        if result.incomplete { " (onvolledig)" } else { "" },
        config.truncate(&result.render_text())
    ));

    if !history.is_empty() {
        context.push_str("\nEERDER IN DIT GESPREK:\n");
        for turn in history {
            let speaker = match (turn.role, &turn.persona) {
                (ChatRole::User, _) => "Gebruiker".to_string(),
                (ChatRole::Assistant, Some(persona)) => persona.clone(),
                (ChatRole::Assistant, None) => "Panel".to_string(),
            };
            context.push_str(&format!("{}: {}\n", speaker, turn.content.trim()));
        }
    }
    context
}
