//! Turn Policy Gates
//!
//! Two classifiers wrap every turn. The safety gate runs on the raw user
//! message before any routing and can block the turn outright. The
//! language gate runs on the composed reply and can only flag it; the
//! reply is never rewritten.
//!
//! Classification itself is an injected dependency ([`SafetyClassifier`],
//! [`LanguageClassifier`]). The gates own the timeout and the failure
//! policy: a classifier that errors or times out lets the turn through
//! and logs a warning.

use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};

pub mod classifier;
pub mod language;
pub mod safety;

pub use classifier::LlmClassifier;
pub use language::{LanguageCheck, LanguageGate};
pub use safety::SafetyGate;

/// Fixed reply for a blocked turn
pub const REFUSAL: &str = "Beklager, men jeg kan ikke hjelpe med det du spør om. \
     Jeg er en fitness-coach og kan hjelpe deg med trening, kosthold og mål. \
     Hvis du trenger medisinsk hjelp, ta kontakt med legen din.";

/// `blocked_reason` reported for a safety block
pub const SAFETY_REASON: &str = "safety";

/// Categories the safety classifier may flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsafeCategory {
    MedicalDiagnosis,
    SelfHarm,
    Abuse,
    IllegalSubstances,
    DisorderedEating,
    #[serde(other)]
    Other,
}

impl UnsafeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MedicalDiagnosis => "medical_diagnosis",
            Self::SelfHarm => "self_harm",
            Self::Abuse => "abuse",
            Self::IllegalSubstances => "illegal_substances",
            Self::DisorderedEating => "disordered_eating",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub is_unsafe: bool,
    #[serde(default)]
    pub category: Option<UnsafeCategory>,
    #[serde(default)]
    pub reasoning: String,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            is_unsafe: false,
            category: None,
            reasoning: String::new(),
        }
    }

    pub fn unsafe_because(category: UnsafeCategory, reasoning: impl Into<String>) -> Self {
        Self {
            is_unsafe: true,
            category: Some(category),
            reasoning: reasoning.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageVerdict {
    pub is_wrong_language: bool,
    #[serde(default)]
    pub detected_language: String,
    #[serde(default)]
    pub reasoning: String,
}

#[async_trait]
pub trait SafetyClassifier: Send + Sync {
    async fn classify_safety(&self, message: &str) -> Result<SafetyVerdict, EngineError>;
}

#[async_trait]
pub trait LanguageClassifier: Send + Sync {
    async fn classify_language(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<LanguageVerdict, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_category_parses_as_other() {
        let verdict: SafetyVerdict = serde_json::from_str(
            r#"{"is_unsafe": true, "category": "weapons", "reasoning": "x"}"#,
        )
        .unwrap();
        assert_eq!(verdict.category, Some(UnsafeCategory::Other));
    }

    #[test]
    fn test_null_category_is_accepted() {
        let verdict: SafetyVerdict =
            serde_json::from_str(r#"{"is_unsafe": false, "category": null}"#).unwrap();
        assert_eq!(verdict, SafetyVerdict::safe());
    }
}
