// LLM prompt constants for the Debate module.
// Reuses cross-cutting fragments from llm_client::prompts.

use crate::config::EvaluationConfig;
use crate::llm_client::prompts::with_house_rules;
use crate::models::transcript::TranscriptTurn;
use crate::transcript::render_markdown;

/// Speaker label of the moderator in every transcript.
pub const MODERATOR: &str = "Moderator";

/// Content of a persona turn whose call failed after retries.
pub const NO_RESPONSE: &str = "[no response]";

const BASE_TURN_WORDS: usize = 150;
const BASE_MODERATOR_WORDS: usize = 120;

const MODERATOR_SYSTEM: &str = "\
    Je bent de onafhankelijke moderator van een selectiepanel. \
    Je leidt het gesprek tussen de panelleden, bewaakt dat iedereen aan bod komt \
    en vat standpunten neutraal samen. Je geeft zelf geen eigen oordeel over de kandidaat \
    behalve in de afsluitende synthese.";

const OPEN_TEMPLATE: &str = "\
Open het panelgesprek over deze kandidaat. De panelleden zijn: {panel}.
Schets in maximaal {words} woorden de vacature, de kern van het kandidaatprofiel \
en de vragen die het panel moet beantwoorden.";

const FIRST_ROUND_TEMPLATE: &str = "\
Je bent aan de beurt als {persona}. Geef je beoordeling van de kandidaat vanuit jouw rol \
in maximaal {words} woorden. Noem concrete sterke punten, risico's en je voorlopige advies.";

const LATER_ROUND_TEMPLATE: &str = "\
Je bent opnieuw aan de beurt als {persona} (ronde {round}). Reageer in maximaal {words} woorden \
op de andere panelleden: waar ben je het mee eens, waar niet, en verandert dit je advies?";

const CLOSE_TEMPLATE: &str = "\
Sluit het panelgesprek af. Vat in maximaal {words} woorden de standpunten samen, \
benoem waar het panel het over eens en oneens is en geef een eindadvies: \
'Sterk aanbevelen', 'Twijfel' of 'Niet aanbevelen'.";

pub fn moderator_system_prompt() -> String {
    with_house_rules(MODERATOR_SYSTEM)
}

pub fn persona_system_prompt(persona_prompt: &str) -> String {
    with_house_rules(persona_prompt)
}

/// Run materials followed by the transcript so far.
pub fn debate_context(materials_context: &str, transcript: &[TranscriptTurn]) -> String {
    if transcript.is_empty() {
        return materials_context.to_string();
    }
    format!(
        "{}\nTRANSCRIPT TOT NU TOE:\n{}\n",
        materials_context,
        render_markdown(transcript)
    )
}

pub fn open_question(panel: &[String], config: &EvaluationConfig) -> String {
    OPEN_TEMPLATE
        .replace("{panel}", &panel.join(", "))
        .replace("{words}", &config.target_words(BASE_MODERATOR_WORDS).to_string())
}

pub fn turn_question(persona: &str, round: u32, config: &EvaluationConfig) -> String {
    let template = if round <= 1 {
        FIRST_ROUND_TEMPLATE
    } else {
        LATER_ROUND_TEMPLATE
    };
    template
        .replace("{persona}", persona)
        .replace("{round}", &round.to_string())
        .replace("{words}", &config.target_words(BASE_TURN_WORDS).to_string())
}

pub fn close_question(config: &EvaluationConfig) -> String {
    CLOSE_TEMPLATE.replace("{words}", &config.target_words(BASE_MODERATOR_WORDS).to_string())
}
