// LLM prompt constants for the evaluation flow.
// Reuses cross-cutting fragments from llm_client::prompts.

use crate::config::EvaluationConfig;
use crate::llm_client::prompts::{with_house_rules, JSON_ONLY_SYSTEM};

/// Word budget for a persona's analysis at density 1.0.
const BASE_ANALYSIS_WORDS: usize = 200;

/// Verdict schema the persona must answer with. `{words}` is filled from the
/// configured prompt density.
const VERDICT_PROMPT_TEMPLATE: &str = r#"Beoordeel de kandidaat vanuit jouw rol voor deze vacature.

Geef een JSON-object met EXACT dit schema (geen extra velden):
{
  "score": 7.5,
  "analysis": "onderbouwde analyse van maximaal {words} woorden",
  "recommendation": "korte aanbeveling, bijvoorbeeld 'Sterk aanbevelen', 'Twijfel' of 'Niet aanbevelen'",
  "big_hits": "grootste pluspunten",
  "big_misses": "grootste minpunten of risico's"
}

Regels:
- "score" is een getal van 0 tot en met 10.
- Verwijs in de analyse naar concrete punten uit vacature en kandidaatprofiel."#;

/// System prompt for a persona verdict call.
pub fn verdict_system_prompt(persona_prompt: &str) -> String {
    format!("{}\n\n{}", with_house_rules(persona_prompt), JSON_ONLY_SYSTEM)
}

pub fn verdict_question(config: &EvaluationConfig) -> String {
    VERDICT_PROMPT_TEMPLATE.replace(
        "{words}",
        &config.target_words(BASE_ANALYSIS_WORDS).to_string(),
    )
}
