//! LLM-backed classifiers
//!
//! Both gates ask a small model for a single JSON object. Some backends
//! wrap the object in a code fence or a sentence even in JSON mode, so the
//! outermost `{...}` span of the reply is what gets parsed.

use std::sync::Arc;

use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::de::DeserializeOwned;

use super::{LanguageClassifier, LanguageVerdict, SafetyClassifier, SafetyVerdict};
use crate::agent::inference_error;
use crate::llm::router::LLMRouter;
use crate::llm::{InferenceRequest, InferenceRole, LLMResponse, Message};

const SAFETY_INSTRUCTIONS: &str = r#"You are a safety classifier for a fitness coaching chat.
Decide whether the user's message falls into one of these categories:

- medical_diagnosis: asks for a diagnosis of symptoms or a medical condition
- self_harm: self-harm, suicidal thoughts or another acute crisis
- abuse: harassment or abuse directed at the coach
- illegal_substances: requests for illegal drugs or steroids without prescription
- disordered_eating: encourages extreme restriction, purging or other disordered eating

Ordinary questions about training, nutrition, weight loss, supplements,
soreness and recovery are SAFE and must not be flagged.

Respond with one JSON object only:
{"is_unsafe": true|false, "category": "<category or null>", "reasoning": "<one sentence>"}"#;

fn language_instructions(target_language: &str) -> String {
    format!(
        r#"You check which language a coaching reply is written in.
The reply must be predominantly written in {target}.
Short foreign terms, exercise names, brand names and personal names are fine.
Flag the text only if most of it is in another language.

Respond with one JSON object only:
{{"is_wrong_language": true|false, "detected_language": "<language>", "reasoning": "<one sentence>"}}"#,
        target = target_language
    )
}

/// Parse the first JSON object found in a classifier reply
pub fn parse_verdict<T: DeserializeOwned>(reply: &str) -> Result<T, EngineError> {
    let body = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => {
            return Err(EngineError::Validation(format!(
                "classifier reply has no JSON object: {}",
                reply
            )))
        }
    };
    Ok(serde_json::from_str(body)?)
}

/// Classifier that asks the configured providers
pub struct LlmClassifier {
    llm: Arc<LLMRouter>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<LLMRouter>) -> Self {
        Self { llm }
    }

    async fn ask<T: DeserializeOwned>(
        &self,
        instructions: String,
        input: String,
    ) -> Result<T, EngineError> {
        let request = InferenceRequest::new(InferenceRole::Classifier, instructions)
            .with_messages(vec![Message::user(input)])
            .json();
        let (response, provider) = self.llm.call(&request).await.map_err(inference_error)?;
        match response {
            LLMResponse::FinalAnswer(answer) => parse_verdict(&answer.content),
            LLMResponse::ToolCall(call) => Err(EngineError::Validation(format!(
                "{} answered a classification with a tool call to {}",
                provider, call.name
            ))),
        }
    }
}

#[async_trait]
impl SafetyClassifier for LlmClassifier {
    async fn classify_safety(&self, message: &str) -> Result<SafetyVerdict, EngineError> {
        self.ask(SAFETY_INSTRUCTIONS.to_string(), message.to_string())
            .await
    }
}

#[async_trait]
impl LanguageClassifier for LlmClassifier {
    async fn classify_language(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<LanguageVerdict, EngineError> {
        self.ask(
            language_instructions(target_language),
            format!("Check this text: {}", text),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::UnsafeCategory;

    #[test]
    fn test_parses_fenced_reply() {
        let reply = "```json\n{\"is_unsafe\": true, \"category\": \"self_harm\", \"reasoning\": \"crisis\"}\n```";
        let verdict: SafetyVerdict = parse_verdict(reply).unwrap();
        assert!(verdict.is_unsafe);
        assert_eq!(verdict.category, Some(UnsafeCategory::SelfHarm));
    }

    #[test]
    fn test_reply_without_object_is_an_error() {
        let result: Result<LanguageVerdict, _> = parse_verdict("Norwegian");
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_language_instructions_name_target() {
        assert!(language_instructions("Norwegian").contains("predominantly written in Norwegian"));
    }
}
