//! Parsing of a persona's answer into a `PersonaVerdict`.
//!
//! Personas are asked for JSON. Models do not always comply, so a response
//! that is not a JSON object is read qualitatively: labelled `score:` and
//! `recommendation:` lines, or an `N/10` mark anywhere in the text.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::llm_client::{strip_json_fences, LlmError};
use crate::models::evaluation::PersonaVerdict;

/// `**Score:** 8`, `- cijfer: 7,5/10` and similar labelled score lines.
static SCORE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s*#>-]*(?:score|cijfer|beoordeling)[\s*]*:[\s*]*(.*)$")
        .expect("SCORE_LINE_RE regex should compile")
});

/// `**Aanbeveling:** ...` and similar labelled recommendation lines.
static RECOMMENDATION_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s*#>-]*(?:recommendation|aanbeveling|advies)[\s*]*:[\s*]*(.*)$")
        .expect("RECOMMENDATION_LINE_RE regex should compile")
});

/// First signed number (dot or comma decimals), optionally followed by `/100`.
/// A minus directly after a digit is a range (`7-8`), not a sign.
static SCORE_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\d.,])(-?\d+(?:[.,]\d+)?)\s*(/\s*100\b)?")
        .expect("SCORE_VALUE_RE regex should compile")
});

/// A number directly in front of `/10` (not `/100`).
static OUT_OF_TEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\d.,])(-?\d+(?:[.,]\d+)?)\s*/\s*10\b")
        .expect("OUT_OF_TEN_RE regex should compile")
});

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    score: Value,
    #[serde(default)]
    analysis: Option<String>,
    #[serde(default)]
    recommendation: Option<String>,
    #[serde(default)]
    big_hits: Value,
    #[serde(default)]
    big_misses: Value,
}

/// Parses a persona response. A blank response, or JSON carrying neither a
/// score nor any text, is `EmptyContent` and counts as a failed call.
pub fn parse_verdict(persona_name: &str, text: &str) -> Result<PersonaVerdict, LlmError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(LlmError::EmptyContent);
    }

    let verdict = match serde_json::from_str::<RawVerdict>(strip_json_fences(text)) {
        Ok(raw) => from_json(persona_name, raw),
        Err(e) => {
            debug!("Verdict of '{persona_name}' is not JSON ({e}), reading it as text");
            from_text(persona_name, text)
        }
    };

    if verdict.score.is_none()
        && verdict.analysis.trim().is_empty()
        && verdict.recommendation.trim().is_empty()
    {
        return Err(LlmError::EmptyContent);
    }
    Ok(verdict)
}

fn from_json(persona_name: &str, raw: RawVerdict) -> PersonaVerdict {
    PersonaVerdict {
        persona_name: persona_name.to_string(),
        score: score_from_value(&raw.score),
        analysis: raw.analysis.unwrap_or_default().trim().to_string(),
        recommendation: raw.recommendation.unwrap_or_default().trim().to_string(),
        big_hits: text_from_value(&raw.big_hits),
        big_misses: text_from_value(&raw.big_misses),
    }
}

fn from_text(persona_name: &str, text: &str) -> PersonaVerdict {
    let score = labelled(&SCORE_LINE_RE, text)
        .and_then(score_from_text)
        .or_else(|| OUT_OF_TEN_RE.captures(text).and_then(|c| parse_number(&c[1])))
        .and_then(normalize_score);

    let recommendation = labelled(&RECOMMENDATION_LINE_RE, text)
        .filter(|r| !r.is_empty())
        .or_else(|| text.lines().map(str::trim).filter(|l| !l.is_empty()).last())
        .unwrap_or_default()
        .to_string();

    PersonaVerdict {
        persona_name: persona_name.to_string(),
        score,
        analysis: text.to_string(),
        recommendation,
        big_hits: None,
        big_misses: None,
    }
}

/// Clamps to [0, 10]; non-finite scores are treated as absent.
fn normalize_score(score: f64) -> Option<f64> {
    score.is_finite().then(|| score.clamp(0.0, 10.0))
}

fn score_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(normalize_score),
        Value::String(s) => score_from_text(s).and_then(normalize_score),
        _ => None,
    }
}

/// Accepts strings and lists of strings (joined with "; ").
fn text_from_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// `"7.5"`, `"8/10"`, `"7,5 van 10"`, `"-3"` and `"80/100"` all read as a raw
/// score; clamping happens in [`normalize_score`].
fn score_from_text(text: &str) -> Option<f64> {
    let caps = SCORE_VALUE_RE.captures(text)?;
    let value = parse_number(&caps[1])?;
    if caps.get(2).is_some() {
        Some(value / 10.0)
    } else {
        Some(value)
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse().ok()
}

/// Value part of the first line matched by `re`, without bold markers.
fn labelled<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    let value = re.captures(text)?.get(1)?.as_str();
    Some(value.trim().trim_matches('*').trim())
}
