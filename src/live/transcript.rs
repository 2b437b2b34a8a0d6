//! Incremental transcript assembly.
//!
//! The live service streams transcription of both directions as small text
//! fragments.  [`TranscriptAssembler`] concatenates them per speaker and,
//! when the service signals the end of a turn, emits at most one finished
//! [`TranscriptEntry`] per speaker, user first.
//!
//! ```
//! use farmer_assistant::live::TranscriptAssembler;
//! use farmer_assistant::types::Speaker;
//!
//! let mut asm = TranscriptAssembler::new();
//! asm.append_input("Hel");
//! asm.append_input("lo");
//! asm.append_output("Hi");
//! let entries = asm.complete_turn().entries();
//! assert_eq!(entries.len(), 2);
//! assert_eq!(entries[0].speaker, Speaker::User);
//! assert_eq!(entries[0].text, "Hello");
//! ```

use serde::Serialize;
use uuid::Uuid;

use crate::types::Speaker;

/// One finalized line of the live transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub text: String,
    pub speaker: Speaker,
}

impl TranscriptEntry {
    fn new(text: String, speaker: Speaker) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text,
            speaker,
        }
    }
}

/// Result of [`TranscriptAssembler::complete_turn`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedTurn {
    pub user: Option<TranscriptEntry>,
    pub bot: Option<TranscriptEntry>,
}

impl CompletedTurn {
    /// Entries in log order: user, then bot.
    pub fn entries(self) -> Vec<TranscriptEntry> {
        self.user.into_iter().chain(self.bot).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.bot.is_none()
    }
}

/// Two accumulating buffers, one per direction.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    input: String,
    output: String,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment of the user's transcribed speech.
    pub fn append_input(&mut self, fragment: &str) {
        self.input.push_str(fragment);
    }

    /// Append a fragment of the assistant's transcribed speech.
    pub fn append_output(&mut self, fragment: &str) {
        self.output.push_str(fragment);
    }

    /// Trim both buffers, emit an entry for each non-empty one and clear
    /// both.  A second call without new fragments yields nothing.
    pub fn complete_turn(&mut self) -> CompletedTurn {
        let user = finish(&mut self.input, Speaker::User);
        let bot = finish(&mut self.output, Speaker::Bot);
        CompletedTurn { user, bot }
    }

    /// Drop partial text without emitting it.  Used on session teardown.
    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
    }

    pub fn pending_input(&self) -> &str {
        &self.input
    }

    pub fn pending_output(&self) -> &str {
        &self.output
    }
}

fn finish(buffer: &mut String, speaker: Speaker) -> Option<TranscriptEntry> {
    let text = buffer.trim().to_string();
    buffer.clear();
    (!text.is_empty()).then(|| TranscriptEntry::new(text, speaker))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_are_joined_per_speaker() {
        let mut asm = TranscriptAssembler::new();
        asm.append_input("Hel");
        asm.append_input("lo");
        asm.append_output("Hi");
        asm.append_output("");

        let turn = asm.complete_turn();
        assert_eq!(turn.user.as_ref().map(|e| e.text.as_str()), Some("Hello"));
        assert_eq!(turn.bot.as_ref().map(|e| e.text.as_str()), Some("Hi"));

        let entries = turn.entries();
        assert_eq!(entries[0].speaker, Speaker::User);
        assert_eq!(entries[1].speaker, Speaker::Bot);
    }

    #[test]
    fn second_completion_is_empty() {
        let mut asm = TranscriptAssembler::new();
        asm.append_input("Hello");
        asm.complete_turn();
        let again = asm.complete_turn();
        assert!(again.is_empty());
        assert!(again.entries().is_empty());
    }

    #[test]
    fn whitespace_only_buffers_emit_nothing() {
        let mut asm = TranscriptAssembler::new();
        asm.append_input("   ");
        asm.append_output(" how much water? ");
        let entries = asm.complete_turn().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].speaker, Speaker::Bot);
        assert_eq!(entries[0].text, "how much water?");
    }

    #[test]
    fn entry_ids_are_unique() {
        let mut asm = TranscriptAssembler::new();
        asm.append_input("a");
        asm.append_output("b");
        let entries = asm.complete_turn().entries();
        assert_ne!(entries[0].id, entries[1].id);
    }

    #[test]
    fn clear_discards_partial_text() {
        let mut asm = TranscriptAssembler::new();
        asm.append_input("half a sen");
        asm.clear();
        assert_eq!(asm.pending_input(), "");
        assert!(asm.complete_turn().is_empty());
    }
}
