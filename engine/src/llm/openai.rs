//! OpenAI-compatible chat completions provider
//!
//! Uses native function calling: the request's catalog is sent as `tools`
//! with `parallel_tool_calls` disabled, so every step yields at most one
//! capability invocation. Replies that smuggle a call into the text are
//! still recovered by [`super::parse_tool_calls`].

use super::{
    FinalAnswer, InferenceRequest, InferenceRole, LLMError, LLMProvider, LLMResponse, Message,
    MessageRole, ToolCall,
};
use crate::config::OpenAIConfig;
use crate::secrets::{SecretCache, SecretManager, SecretString, OPENAI_API_KEY};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

enum KeySource {
    Cache(Arc<SecretCache>),
    Fixed(SecretString),
}

pub struct OpenAIProvider {
    config: OpenAIConfig,
    key: KeySource,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig, secret_cache: Arc<SecretCache>) -> Self {
        Self::build(config, KeySource::Cache(secret_cache))
    }

    /// Provider with an explicit key, bypassing environment and keychain
    pub fn with_api_key(config: OpenAIConfig, api_key: SecretString) -> Self {
        Self::build(config, KeySource::Fixed(api_key))
    }

    fn build(config: OpenAIConfig, key: KeySource) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            config,
            key,
            client,
        }
    }

    fn api_key(&self) -> super::Result<SecretString> {
        let key = match &self.key {
            KeySource::Fixed(key) => Some(key.clone()),
            KeySource::Cache(cache) => cache
                .get_secret(OPENAI_API_KEY)
                .map_err(|e| LLMError::AuthenticationFailed(e.to_string()))?,
        };
        key.filter(|k| !k.is_empty()).ok_or_else(|| {
            LLMError::AuthenticationFailed(
                "No OpenAI API key (set OPENAI_API_KEY or run `mentor secret set openai_api_key`)"
                    .to_string(),
            )
        })
    }

    fn model_for(&self, role: InferenceRole) -> &str {
        match role {
            InferenceRole::Master => &self.config.model,
            InferenceRole::Delegate => &self.config.delegate_model,
            InferenceRole::Classifier => &self.config.classifier_model,
        }
    }

    fn convert_message(msg: &Message) -> Value {
        match (msg.role, &msg.tool_call) {
            (MessageRole::Assistant, Some(call)) => json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": [{
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments },
                }],
            }),
            (MessageRole::Tool, _) => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
                "content": msg.content,
            }),
            _ => json!({
                "role": msg.role.to_string(),
                "content": msg.content,
            }),
        }
    }

    fn build_payload(&self, request: &InferenceRequest) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": request.system_prompt })];
        messages.extend(request.messages.iter().map(Self::convert_message));

        let mut payload = json!({
            "model": self.model_for(request.role),
            "messages": messages,
            "temperature": request.temperature,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|spec| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": spec.name,
                            "description": spec.description,
                            "parameters": spec.parameters_schema(),
                        },
                    })
                })
                .collect();
            payload["tools"] = Value::Array(tools);
            payload["parallel_tool_calls"] = Value::Bool(false);
        }
        if request.json_mode {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        payload
    }

    fn parse_response(data: &Value, request: &InferenceRequest) -> super::Result<LLMResponse> {
        let message = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| LLMError::ParseError("No message in response".to_string()))?;

        if let Some(call) = message
            .get("tool_calls")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
        {
            let function = call
                .get("function")
                .ok_or_else(|| LLMError::ParseError("Tool call without function".to_string()))?;
            let name = function
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| LLMError::ParseError("Tool call without name".to_string()))?;
            let arguments = function
                .get("arguments")
                .and_then(|a| a.as_str())
                .unwrap_or("{}");
            let tool_call = match call.get("id").and_then(|id| id.as_str()) {
                Some(id) => ToolCall::new(id, name, arguments),
                None => ToolCall::generated(name, arguments),
            };
            return Ok(LLMResponse::ToolCall(tool_call));
        }

        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| LLMError::ParseError("Empty content".to_string()))?;

        if let Some(tool_call) = super::parse_tool_calls(content, request) {
            return Ok(LLMResponse::ToolCall(tool_call));
        }
        Ok(LLMResponse::FinalAnswer(FinalAnswer::new(content)))
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_local(&self) -> bool {
        false
    }

    fn estimated_cost(&self, tokens: usize) -> f64 {
        // Approx $0.005 per 1k tokens for gpt-4o input
        (tokens as f64 / 1000.0) * 0.005
    }

    async fn check_health(&self) -> bool {
        self.api_key().is_ok()
    }

    async fn generate(&self, request: &InferenceRequest) -> super::Result<LLMResponse> {
        let api_key = self.api_key()?;
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let payload = self.build_payload(request);

        tracing::debug!(
            "OpenAI request: model={}, messages={}, tools={}",
            self.model_for(request.role),
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key.expose())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else if e.is_connect() {
                    LLMError::ProviderUnavailable(format!(
                        "Cannot connect to {}",
                        self.config.base_url
                    ))
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = SecretManager::scrub(&response.text().await.unwrap_or_default());

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                500..=599 => LLMError::ProviderUnavailable(format!("{}: {}", status, text)),
                _ => LLMError::InvalidRequest(text),
            });
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        Self::parse_response(&data, request)
    }
}
