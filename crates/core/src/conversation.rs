//! Conversation turns accumulated while a voice bridge is live.
//!
//! A `TurnLog` exists for exactly one bridge invocation: it is created when
//! the bridge starts, filled in upstream-delivery order while audio flows,
//! and handed to the post-session hook when the bridge tears down.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The attributed speaker of a conversation turn.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// One attributed utterance in a conversation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
}

/// Append-only, receipt-ordered turn list for one bridge invocation.
///
/// Appends are idempotent: the input and output transcription legs overlap,
/// and the greeting exchange can echo the same utterance twice in a row. A
/// turn whose role and normalized text match the previous turn coalesces
/// into it instead of producing a duplicate transcript line.
#[derive(Debug, Default)]
pub struct TurnLog {
    turns: Vec<ConversationTurn>,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn after trimming its text.
    ///
    /// Returns `true` if a new turn was stored, `false` if the text was
    /// empty or coalesced into the previous turn.
    pub fn push(&mut self, role: TurnRole, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        if let Some(last) = self.turns.last() {
            if last.role == role && last.text == text {
                return false;
            }
        }
        self.turns.push(ConversationTurn {
            role,
            text: text.to_string(),
        });
        true
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<ConversationTurn> {
        self.turns
    }
}
