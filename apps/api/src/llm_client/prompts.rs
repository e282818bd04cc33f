// Shared prompt constants.
// Each service that needs LLM calls defines its own prompts.rs alongside it.
// This file contains cross-cutting prompt fragments.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Every voice in the panel answers in Dutch, the language of the recommendation lexicon.
pub const LANGUAGE_INSTRUCTION: &str = "Antwoord altijd in het Nederlands.";

/// Keeps personas anchored to the supplied material.
pub const GROUNDING_INSTRUCTION: &str = "\
    Baseer je uitsluitend op de aangeleverde vacature, kandidaatgegevens en bedrijfsnotitie. \
    Verzin geen ervaring, diploma's of feiten die niet in het materiaal staan. \
    Als informatie ontbreekt, benoem dat expliciet.";

/// Appends the shared fragments to a persona or moderator prompt.
pub fn with_house_rules(system_prompt: &str) -> String {
    format!(
        "{}\n\n{}\n{}",
        system_prompt.trim(),
        GROUNDING_INSTRUCTION,
        LANGUAGE_INSTRUCTION
    )
}
