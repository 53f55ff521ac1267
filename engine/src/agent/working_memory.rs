//! Working Memory for a turn
//!
//! Holds the conversation the master router reasons over: the caller's
//! history, filtered to user/assistant entries with content and windowed
//! to the most recent `window` entries, followed by the current message.
//! When the user has a profile, it is injected inline as a
//! `[SYSTEM: Brukerens profil — ...]` prefix so the model sees it even if
//! it skims the system prompt.

use serde::{Deserialize, Serialize};

use crate::llm::{Message, MessageRole};

/// Marker that identifies an injected profile prefix
pub const PROFILE_MARKER: &str = "[SYSTEM:";

/// Average characters per token (rough estimate: 1 token ≈ 4 characters)
const CHARS_PER_TOKEN: usize = 4;

/// One entry of caller-supplied conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

fn default_role() -> String {
    "user".to_string()
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    fn to_message(&self) -> Option<Message> {
        if self.content.trim().is_empty() {
            return None;
        }
        match self.role.as_str() {
            "user" => Some(Message::user(&self.content)),
            "assistant" => Some(Message::assistant(&self.content)),
            _ => None,
        }
    }
}

/// Conversation for one routing pass
#[derive(Debug, Clone, Default)]
pub struct WorkingMemory {
    /// Windowed history, oldest first
    history: Vec<Message>,
    current: Option<Message>,
}

impl WorkingMemory {
    /// Keep the last `window` usable entries of `history`
    pub fn from_history(history: &[HistoryEntry], window: usize) -> Self {
        let usable: Vec<Message> = history.iter().filter_map(HistoryEntry::to_message).collect();
        let skip = usable.len().saturating_sub(window);
        Self {
            history: usable.into_iter().skip(skip).collect(),
            current: None,
        }
    }

    pub fn set_current(&mut self, message: impl Into<String>) {
        self.current = Some(Message::user(message));
    }

    /// Prefix the profile onto the first user message of the window, or
    /// onto the current message when the window is empty. A message that
    /// already carries a prefix is left alone. Returns whether a prefix
    /// was added.
    pub fn inject_profile(&mut self, profile_inline: &str) -> bool {
        if profile_inline.trim().is_empty() {
            return false;
        }
        let target = if self.history.is_empty() {
            self.current.as_mut()
        } else {
            self.history.first_mut().filter(|m| m.role == MessageRole::User)
        };
        match target {
            Some(message) if !message.content.contains(PROFILE_MARKER) => {
                message.content = format!(
                    "{} Brukerens profil — {}] {}",
                    PROFILE_MARKER, profile_inline, message.content
                );
                true
            }
            _ => false,
        }
    }

    /// History followed by the current message
    pub fn messages(&self) -> Vec<Message> {
        self.history
            .iter()
            .chain(self.current.iter())
            .cloned()
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Rough size of the conversation in tokens
    pub fn token_count(&self) -> usize {
        self.history
            .iter()
            .chain(self.current.iter())
            .map(|m| m.content.len().div_ceil(CHARS_PER_TOKEN) + 4)
            .sum()
    }
}
