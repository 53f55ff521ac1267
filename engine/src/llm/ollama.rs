//! Ollama LLM Provider
//!
//! Local fallback backend, typically at http://localhost:11434. Tool use goes
//! through the text protocol: the catalog is rendered into the system prompt
//! and calls are recovered from the reply with [`super::parse_tool_calls`].
//! One model serves every inference role.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    FinalAnswer, InferenceRequest, LLMError, LLMProvider, LLMResponse, MessageRole, Result,
};

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Flatten a request into Ollama's chat messages
    fn convert_messages(&self, request: &InferenceRequest) -> Vec<OllamaMessage> {
        let mut system = request.system_prompt.clone();
        system.push_str(&super::render_tool_catalog(&request.tools));

        let mut out = vec![OllamaMessage {
            role: "system".to_string(),
            content: system,
        }];

        for msg in &request.messages {
            let converted = match (msg.role, &msg.tool_call) {
                // Echo prior calls back in the same text protocol the model was taught
                (MessageRole::Assistant, Some(call)) => OllamaMessage {
                    role: "assistant".to_string(),
                    content: format!(
                        "{{\"function\": \"{}\", \"arguments\": {}}}",
                        call.name,
                        if call.arguments.trim().is_empty() {
                            "{}"
                        } else {
                            call.arguments.as_str()
                        }
                    ),
                },
                (MessageRole::Tool, _) => OllamaMessage {
                    role: "tool".to_string(),
                    content: msg.content.clone(),
                },
                (role, _) => OllamaMessage {
                    role: role.to_string(),
                    content: msg.content.clone(),
                },
            };
            out.push(converted);
        }
        out
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn is_local(&self) -> bool {
        true
    }

    fn estimated_cost(&self, _tokens: usize) -> f64 {
        0.0
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url.trim_end_matches('/'));
        matches!(self.client.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<LLMResponse> {
        let messages = self.convert_messages(request);

        tracing::debug!(
            "Ollama request: model={}, messages={}, total_chars={}",
            self.model,
            messages.len(),
            messages.iter().map(|m| m.content.len()).sum::<usize>()
        );

        let body = OllamaRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            format: request.json_mode.then(|| "json".to_string()),
            options: OllamaOptions {
                temperature: request.temperature,
            },
        };

        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else if e.is_connect() {
                    LLMError::ProviderUnavailable(format!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.base_url
                    ))
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        tracing::info!(
            "Ollama response received in {:.1}s",
            start.elapsed().as_secs_f64()
        );

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderUnavailable(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse Ollama response: {}", e)))?;

        let content = parsed.message.content;
        if let Some(tool_call) = super::parse_tool_calls(&content, request) {
            Ok(LLMResponse::ToolCall(tool_call))
        } else {
            Ok(LLMResponse::FinalAnswer(FinalAnswer::new(content)))
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}
