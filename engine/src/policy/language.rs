//! Post-turn language gate
//!
//! Short replies (greetings, confirmations) skip the classifier entirely.
//! Longer replies are sampled from the start and classified; a reply in
//! the wrong language is flagged, never rewritten.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use super::LanguageClassifier;
use crate::config::PolicyConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LanguageCheck {
    /// Too short, or the gate is disabled
    Skipped,
    Passed,
    Flagged { detected_language: String },
    /// The classifier failed or timed out
    Unchecked,
}

impl LanguageCheck {
    pub fn is_flagged(&self) -> bool {
        matches!(self, Self::Flagged { .. })
    }
}

pub struct LanguageGate {
    classifier: Arc<dyn LanguageClassifier>,
    target_language: String,
    min_chars: usize,
    sample_chars: usize,
    timeout: Duration,
    enabled: bool,
}

impl LanguageGate {
    pub fn new(classifier: Arc<dyn LanguageClassifier>, config: &PolicyConfig) -> Self {
        Self {
            classifier,
            target_language: config.target_language.clone(),
            min_chars: config.language_min_chars,
            sample_chars: config.language_sample_chars,
            timeout: config.gate_timeout(),
            enabled: config.language_enabled,
        }
    }

    pub async fn check(&self, reply: &str) -> LanguageCheck {
        let trimmed = reply.trim();
        if !self.enabled || trimmed.chars().count() < self.min_chars {
            return LanguageCheck::Skipped;
        }

        let sample: String = reply.chars().take(self.sample_chars).collect();
        let call = self
            .classifier
            .classify_language(&sample, &self.target_language);

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(verdict)) if verdict.is_wrong_language => {
                warn!(
                    detected = %verdict.detected_language,
                    expected = %self.target_language,
                    reasoning = %verdict.reasoning,
                    "Reply flagged by language gate"
                );
                LanguageCheck::Flagged {
                    detected_language: verdict.detected_language,
                }
            }
            Ok(Ok(_)) => {
                debug!("Language gate passed");
                LanguageCheck::Passed
            }
            Ok(Err(e)) => {
                warn!("Language classifier failed: {}", e);
                LanguageCheck::Unchecked
            }
            Err(_) => {
                warn!(
                    "Language classifier timed out after {}s",
                    self.timeout.as_secs()
                );
                LanguageCheck::Unchecked
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::LanguageVerdict;
    use async_trait::async_trait;
    use sdk::errors::EngineError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        wrong: bool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageClassifier for Recording {
        async fn classify_language(
            &self,
            text: &str,
            _target_language: &str,
        ) -> Result<LanguageVerdict, EngineError> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(text.to_string());
            }
            Ok(LanguageVerdict {
                is_wrong_language: self.wrong,
                detected_language: if self.wrong { "English" } else { "Norwegian" }.to_string(),
                reasoning: String::new(),
            })
        }
    }

    fn gate(wrong: bool) -> (LanguageGate, Arc<Recording>) {
        let classifier = Arc::new(Recording {
            wrong,
            ..Default::default()
        });
        (
            LanguageGate::new(classifier.clone(), &PolicyConfig::default()),
            classifier,
        )
    }

    #[tokio::test]
    async fn test_short_reply_skips_classifier() {
        let (gate, classifier) = gate(true);
        assert_eq!(gate.check("  Flott, Kari!  ").await, LanguageCheck::Skipped);
        assert!(classifier.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_long_reply_is_sampled() {
        let (gate, classifier) = gate(false);
        let reply = "Dette er et langt svar på norsk. ".repeat(40);
        assert_eq!(gate.check(&reply).await, LanguageCheck::Passed);
        let seen = classifier.seen.lock().unwrap();
        assert_eq!(seen[0].chars().count(), 500);
    }

    #[tokio::test]
    async fn test_wrong_language_is_flagged() {
        let (gate, _) = gate(true);
        let check = gate
            .check("This reply is written entirely in English, sadly.")
            .await;
        assert!(check.is_flagged());
    }
}
