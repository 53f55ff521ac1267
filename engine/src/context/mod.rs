//! Per-turn context
//!
//! A [`TurnContext`] is assembled once at the start of a turn and shared
//! read-only with the router, every capability and the prompt renderer. It
//! is dropped when the turn ends.

use std::sync::Arc;

pub mod assembler;
pub mod persona_cache;

pub use assembler::ContextAssembler;
pub use persona_cache::{PersonaCache, PersonaRevision};

/// Coach persona configuration, loaded from the coach's knowledge rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoachPersona {
    pub voice_tone: String,
    pub training_philosophy: String,
    pub nutrition_philosophy: String,
    pub core_instructions: String,
}

impl CoachPersona {
    /// Apply one knowledge row; unknown keys are ignored
    pub fn apply(&mut self, key: &str, value: &str) {
        let slot = match key {
            "voice_tone" => &mut self.voice_tone,
            "training_philosophy" => &mut self.training_philosophy,
            "nutrition_philosophy" => &mut self.nutrition_philosophy,
            "core_instructions" => &mut self.core_instructions,
            _ => return,
        };
        *slot = value.to_string();
    }

    pub fn is_empty(&self) -> bool {
        self.voice_tone.is_empty()
            && self.training_philosophy.is_empty()
            && self.nutrition_philosophy.is_empty()
            && self.core_instructions.is_empty()
    }
}

/// Labelled profile field present for the user, e.g. ("Vekt", "90")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileItem {
    pub label: &'static str,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct TurnContext {
    pub user_id: String,
    pub coach_id: String,
    /// Empty when neither the user row nor a remembered fact names the user
    pub user_name: String,
    /// "Coach <first name>", or the configured fallback
    pub coach_name: String,
    /// Profile fields present for the user, in fixed label order
    pub profile: Vec<ProfileItem>,
    /// Remembered facts as (key, value), ordered by key
    pub facts: Vec<(String, String)>,
    pub persona: Arc<CoachPersona>,
}

impl TurnContext {
    /// Context with no stored data, for callers that have none
    pub fn empty(
        user_id: impl Into<String>,
        coach_id: impl Into<String>,
        coach_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            coach_id: coach_id.into(),
            user_name: String::new(),
            coach_name: coach_name.into(),
            profile: Vec::new(),
            facts: Vec::new(),
            persona: Arc::new(CoachPersona::default()),
        }
    }

    /// One "- Label: value" line per present profile field
    pub fn onboarding_summary(&self) -> String {
        self.profile
            .iter()
            .map(|item| format!("- {}: {}", item.label, item.value))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// One "- key: value" line per remembered fact
    pub fn facts_summary(&self) -> String {
        self.facts
            .iter()
            .map(|(key, value)| format!("- {}: {}", key, value))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Profile fields joined for the inline "[SYSTEM: ...]" prefix
    pub fn profile_inline(&self) -> String {
        self.profile
            .iter()
            .map(|item| format!("{}: {}", item.label, item.value))
            .collect::<Vec<_>>()
            .join(" | ")
    }

    pub fn has_profile(&self) -> bool {
        !self.profile.is_empty()
    }
}
