//! Transcript codec: decodes the canonical JSON array and the two legacy text
//! encodings (bold speaker markers, loose paragraphs) into `TranscriptTurn`s,
//! and encodes back to the canonical JSON array.
//!
//! Decoding runs [`DecodeStrategy::ORDER`] front to back and keeps the first
//! strategy that yields at least one non-blank turn.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::transcript::{TranscriptBuilder, TranscriptTurn, TurnRole};

/// Speaker used when the whole input is kept as one turn, and for structured
/// turns that name neither a speaker nor a role.
pub const RAW_SPEAKER: &str = "Debate";
/// Longest speaker label accepted inside a bold marker.
const MAX_SPEAKER_LEN: usize = 80;

/// `**Speaker**`, `**Speaker**: inline` or `**Speaker:** inline` at line start.
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\*\*(.+?)\*\*\s*:?\s*(.*?)\s*$").expect("MARKER_RE regex should compile")
});

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("transcript is empty")]
    Empty,

    #[error("failed to encode transcript: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStrategy {
    StructuredJson,
    MarkerDelimited,
    Paragraphs,
    Raw,
}

impl DecodeStrategy {
    pub const ORDER: [DecodeStrategy; 4] = [
        DecodeStrategy::StructuredJson,
        DecodeStrategy::MarkerDelimited,
        DecodeStrategy::Paragraphs,
        DecodeStrategy::Raw,
    ];

    /// Returns `None` when the strategy does not apply or yields no turns.
    fn try_parse(self, input: &str) -> Option<Vec<TranscriptTurn>> {
        let turns = match self {
            DecodeStrategy::StructuredJson => parse_structured(input)?,
            DecodeStrategy::MarkerDelimited => parse_markers(input),
            DecodeStrategy::Paragraphs => parse_paragraphs(input),
            DecodeStrategy::Raw => parse_raw(input),
        };
        if turns.is_empty() {
            None
        } else {
            Some(turns)
        }
    }
}

/// Turns plus the strategy that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub turns: Vec<TranscriptTurn>,
    pub strategy: DecodeStrategy,
}

pub fn decode(input: &str) -> Result<Vec<TranscriptTurn>, CodecError> {
    decode_with_strategy(input).map(|d| d.turns)
}

pub fn decode_with_strategy(input: &str) -> Result<Decoded, CodecError> {
    if input.trim().is_empty() {
        return Err(CodecError::Empty);
    }

    for strategy in DecodeStrategy::ORDER {
        if let Some(turns) = strategy.try_parse(input) {
            debug!(?strategy, turns = turns.len(), "Decoded transcript");
            return Ok(Decoded { turns, strategy });
        }
    }

    Err(CodecError::Empty)
}

/// Encodes turns as the canonical JSON array.
pub fn encode(turns: &[TranscriptTurn]) -> Result<String, CodecError> {
    serde_json::to_string(turns).map_err(|e| CodecError::Encode(e.to_string()))
}

// ────────────────────────────────────────────────────────────────────────────
// Strategy 1: structured JSON
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StructuredTurn {
    role: String,
    content: String,
    #[serde(default)]
    speaker: Option<String>,
}

fn parse_structured(input: &str) -> Option<Vec<TranscriptTurn>> {
    let items: Vec<StructuredTurn> = serde_json::from_str(input.trim()).ok()?;
    let mut builder = TranscriptBuilder::new();
    for item in items {
        let speaker = [item.speaker.as_deref(), Some(item.role.as_str())]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or(RAW_SPEAKER)
            .to_string();
        let role = TurnRole::classify(Some(&item.role), &speaker);
        builder.push(&speaker, role, &item.content);
    }
    Some(builder.into_turns())
}

// ────────────────────────────────────────────────────────────────────────────
// Strategy 2: bold speaker markers at line start
// ────────────────────────────────────────────────────────────────────────────

/// Parses `**Speaker**: inline`, `**Speaker:** inline` or `**Speaker**` at the
/// start of a line. Returns the speaker and the inline remainder.
fn parse_marker(line: &str) -> Option<(&str, &str)> {
    let caps = MARKER_RE.captures(line)?;
    let speaker = caps.get(1)?.as_str().trim().trim_end_matches(':').trim();
    if speaker.is_empty() || speaker.len() > MAX_SPEAKER_LEN {
        return None;
    }
    let inline = caps.get(2).map_or("", |m| m.as_str());
    Some((speaker, inline))
}

fn parse_markers(input: &str) -> Vec<TranscriptTurn> {
    let mut builder = TranscriptBuilder::new();
    let mut preamble: Vec<&str> = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    let mut saw_marker = false;

    for line in input.lines() {
        if let Some((speaker, inline)) = parse_marker(line) {
            if let Some((prev, lines)) = current.take() {
                push_turn(&mut builder, &prev, &lines.join("\n"));
            } else if !saw_marker {
                // Text before the first marker is kept rather than lost.
                push_turn(&mut builder, RAW_SPEAKER, &preamble.join("\n"));
            }
            saw_marker = true;
            current = Some((speaker.to_string(), vec![inline]));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        } else {
            preamble.push(line);
        }
    }

    if !saw_marker {
        return Vec::new();
    }
    if let Some((speaker, lines)) = current {
        push_turn(&mut builder, &speaker, &lines.join("\n"));
    }
    builder.into_turns()
}

fn push_turn(builder: &mut TranscriptBuilder, speaker: &str, content: &str) {
    let role = TurnRole::classify(None, speaker);
    builder.push(speaker, role, content);
}

// ────────────────────────────────────────────────────────────────────────────
// Strategy 3: paragraphs
// ────────────────────────────────────────────────────────────────────────────

/// Like [`parse_marker`] but tolerates markdown decoration in front of the
/// marker (`- **hr**:`, `### **hr**`, `> **hr**`).
fn parse_decorated_marker(line: &str) -> Option<(&str, &str)> {
    let stripped = line
        .trim_start()
        .trim_start_matches(|c: char| c == '#' || c == '-' || c == '>' || c.is_whitespace());
    parse_marker(stripped)
}

fn split_paragraphs(input: &str) -> Vec<Vec<&str>> {
    let mut paragraphs = Vec::new();
    let mut current = Vec::new();
    for line in input.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

fn parse_paragraphs(input: &str) -> Vec<TranscriptTurn> {
    let mut builder = TranscriptBuilder::new();
    for (index, lines) in split_paragraphs(input).into_iter().enumerate() {
        match parse_decorated_marker(lines[0]) {
            Some((speaker, inline)) => {
                let mut body = vec![inline];
                body.extend_from_slice(&lines[1..]);
                push_turn(&mut builder, speaker, &body.join("\n"));
            }
            None => {
                let speaker = format!("Message {}", index + 1);
                builder.push(&speaker, TurnRole::Persona, &lines.join("\n"));
            }
        }
    }
    builder.into_turns()
}

// ────────────────────────────────────────────────────────────────────────────
// Strategy 4: raw
// ────────────────────────────────────────────────────────────────────────────

fn parse_raw(input: &str) -> Vec<TranscriptTurn> {
    let mut builder = TranscriptBuilder::new();
    builder.push(RAW_SPEAKER, TurnRole::Persona, input);
    builder.into_turns()
}
