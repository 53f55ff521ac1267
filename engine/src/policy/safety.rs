//! Pre-turn safety gate

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{SafetyClassifier, SafetyVerdict};

pub struct SafetyGate {
    classifier: Arc<dyn SafetyClassifier>,
    timeout: Duration,
    enabled: bool,
}

impl SafetyGate {
    pub fn new(classifier: Arc<dyn SafetyClassifier>, timeout: Duration, enabled: bool) -> Self {
        Self {
            classifier,
            timeout,
            enabled,
        }
    }

    /// Classify a user message. Classifier failures count as safe.
    pub async fn check(&self, message: &str) -> SafetyVerdict {
        if !self.enabled || message.trim().is_empty() {
            return SafetyVerdict::safe();
        }

        match tokio::time::timeout(self.timeout, self.classifier.classify_safety(message)).await {
            Ok(Ok(verdict)) => {
                if verdict.is_unsafe {
                    info!(
                        category = verdict.category.map(|c| c.as_str()).unwrap_or("other"),
                        reasoning = %verdict.reasoning,
                        "Safety gate blocked message"
                    );
                } else {
                    debug!("Safety gate passed");
                }
                verdict
            }
            Ok(Err(e)) => {
                warn!("Safety classifier failed, letting message through: {}", e);
                SafetyVerdict::safe()
            }
            Err(_) => {
                warn!(
                    "Safety classifier timed out after {}s, letting message through",
                    self.timeout.as_secs()
                );
                SafetyVerdict::safe()
            }
        }
    }
}
