use serde::{Deserialize, Serialize};

/// Who produced a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Moderator,
    Persona,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::Moderator => "moderator",
            TurnRole::Persona => "persona",
        }
    }

    /// "moderator" in either the role tag or the speaker label (any case) marks a moderator turn.
    pub fn classify(role_tag: Option<&str>, speaker: &str) -> Self {
        let tagged = role_tag
            .map(|r| r.trim().eq_ignore_ascii_case("moderator"))
            .unwrap_or(false);
        if tagged || speaker.trim().eq_ignore_ascii_case("moderator") {
            TurnRole::Moderator
        } else {
            TurnRole::Persona
        }
    }
}

/// One turn of a debate transcript. `sequence` is 1-based and strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub speaker: String,
    pub role: TurnRole,
    pub content: String,
    pub sequence: u32,
}

/// Appends turns while holding the transcript invariants: blank turns are
/// dropped and sequence numbers are assigned in order.
#[derive(Debug, Default, Clone)]
pub struct TranscriptBuilder {
    turns: Vec<TranscriptTurn>,
}

impl TranscriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the turn was dropped for being blank.
    pub fn push(&mut self, speaker: &str, role: TurnRole, content: &str) -> bool {
        let content = content.trim();
        if content.is_empty() {
            return false;
        }
        let sequence = self.turns.len() as u32 + 1;
        self.turns.push(TranscriptTurn {
            speaker: speaker.trim().to_string(),
            role,
            content: content.to_string(),
            sequence,
        });
        true
    }

    pub fn turns(&self) -> &[TranscriptTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn into_turns(self) -> Vec<TranscriptTurn> {
        self.turns
    }
}
