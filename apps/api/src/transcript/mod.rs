// Debate transcript encoding. Storage, the debate orchestrator and the chat
// engine all read and write transcripts through this module.

pub mod codec;

pub use codec::{decode, encode, CodecError};

use crate::models::transcript::TranscriptTurn;

/// Renders turns in the bold-marker form (`**Speaker:** content`), which is
/// what prompts show the model and what the marker strategy decodes.
pub fn render_markdown(turns: &[TranscriptTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("**{}:** {}", t.speaker, t.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
