//! LLM Provider Abstraction Layer
//!
//! Every reasoning step in the engine (the master persona, a delegate's
//! sub-reasoning, a policy classifier) is one [`InferenceRequest`] handed
//! to an [`LLMProvider`]. A provider returns either a final textual reply or
//! a request to invoke one capability from the request's catalog.

use async_trait::async_trait;
use sdk::schema::CapabilitySpec;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod ollama;
pub mod openai;
pub mod router;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,

    pub content: String,

    /// Id of the call a tool result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Capability invocation requested by an assistant step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_call_id: None,
            tool_call: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_call: None,
        }
    }

    /// Assistant step that requested a capability invocation
    pub fn assistant_tool_call(call: ToolCall) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: String::new(),
            tool_call_id: None,
            tool_call: Some(call),
        }
    }

    pub fn tool_result(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_call: None,
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Which reasoning unit is asking; providers map this to a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceRole {
    /// The coach persona the user talks to
    Master,
    /// A delegate's sub-reasoning over its executor subset
    Delegate,
    /// A policy gate classifier
    Classifier,
}

/// One reasoning step
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub role: InferenceRole,
    pub system_prompt: String,
    /// Capabilities the step may invoke; empty for plain completion
    pub tools: Vec<CapabilitySpec>,
    pub messages: Vec<Message>,
    pub temperature: f32,
    /// Ask the backend for a single JSON object as the reply
    pub json_mode: bool,
}

impl InferenceRequest {
    pub fn new(role: InferenceRole, system_prompt: impl Into<String>) -> Self {
        Self {
            role,
            system_prompt: system_prompt.into(),
            tools: Vec::new(),
            messages: Vec::new(),
            temperature: 0.0,
            json_mode: false,
        }
    }

    pub fn with_tools(mut self, tools: Vec<CapabilitySpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    /// Rough size of the request in tokens (~4 characters per token)
    pub fn estimated_tokens(&self) -> usize {
        let chars = self.system_prompt.len()
            + self
                .messages
                .iter()
                .map(|m| m.content.len())
                .sum::<usize>();
        chars / 4
    }

    fn knows_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LLMResponse {
    /// The step wants a capability invoked
    ToolCall(ToolCall),

    /// The step produced its reply
    FinalAnswer(FinalAnswer),
}

/// Capability invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,

    pub name: String,

    /// Arguments as raw JSON text
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Tool call with a freshly generated id
    pub fn generated(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self::new(format!("call_{}", uuid::Uuid::new_v4()), name, arguments)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub content: String,
}

impl FinalAnswer {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "openai", "ollama")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider
    fn is_local(&self) -> bool;

    /// Estimated cost in USD for the given number of tokens
    fn estimated_cost(&self, tokens: usize) -> f64;

    /// Run one reasoning step
    async fn generate(&self, request: &InferenceRequest) -> Result<LLMResponse>;

    /// Check if the provider is currently healthy and available
    async fn check_health(&self) -> bool {
        true
    }
}

/// Describe the catalog in the system prompt, for backends without native
/// function calling. The model is asked to answer with a single
/// `{"function": ..., "arguments": {...}}` object when it wants a capability.
pub fn render_tool_catalog(tools: &[CapabilitySpec]) -> String {
    if tools.is_empty() {
        return String::new();
    }

    let mut out = String::from(
        "\n\n# TOOLS\n\nTo call a tool, reply with ONLY this JSON and nothing else:\n\
         {\"function\": \"<tool name>\", \"arguments\": {<arguments>}}\n\
         Call one tool at a time. When you have the answer, reply in plain text.\n\n",
    );
    for tool in tools {
        out.push_str(&format!(
            "- {}: {}\n  parameters: {}\n",
            tool.name,
            tool.description,
            tool.parameters_schema()
        ));
    }
    out
}

/// Recover a tool call from free text.
///
/// Handles the output shapes models produce when they do not (or cannot)
/// use native function calling:
/// 1. Raw JSON: `{"function": "...", "arguments": {...}}`
/// 2. Fenced JSON, with or without trailing prose
/// 3. `<tool_call>name({...})</tool_call>` markers
/// 4. `{"function": ...}` embedded in prose
///
/// Only names present in the request's catalog are accepted.
pub fn parse_tool_calls(content: &str, request: &InferenceRequest) -> Option<ToolCall> {
    if request.tools.is_empty() {
        return None;
    }
    let trimmed = content.trim();

    let candidate = try_parse_function_json(trimmed)
        .or_else(|| {
            extract_fenced_json(trimmed).and_then(|inner| try_parse_function_json(inner.trim()))
        })
        .or_else(|| parse_marker_call(trimmed))
        .or_else(|| {
            let pos = trimmed.find("{\"function\"")?;
            extract_balanced_json(&trimmed[pos..]).and_then(try_parse_function_json)
        })?;

    if request.knows_tool(&candidate.name) {
        Some(candidate)
    } else {
        tracing::warn!("Model named unknown tool '{}' in text reply", candidate.name);
        None
    }
}

fn parse_marker_call(s: &str) -> Option<ToolCall> {
    let start = s.find("<tool_call>")? + "<tool_call>".len();
    let end = s.find("</tool_call>")?;
    let inner = s.get(start..end)?;
    let paren = inner.find('(')?;
    let args_end = inner.rfind(')').unwrap_or(inner.len());
    let arguments = inner.get(paren + 1..args_end)?;
    Some(ToolCall::generated(inner[..paren].trim(), arguments))
}

/// Parse `{"function": "...", "arguments": {...}}`
fn try_parse_function_json(s: &str) -> Option<ToolCall> {
    let json: serde_json::Value = serde_json::from_str(s).ok()?;
    let function = json.get("function")?.as_str()?;
    let arguments = match json.get("arguments") {
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(value) => value.to_string(),
        None => "{}".to_string(),
    };
    Some(ToolCall::generated(function, arguments))
}

/// Body of the first markdown code fence, even with trailing prose
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start = fence_start + 3 + after_opening.find('\n')? + 1;
    let body_end = body_start + content[body_start..].find("```")?;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Balanced JSON object at the start of `s`, respecting string literals
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::schema::{ParamKind, ParamSpec};

    fn request_with_log_weight() -> InferenceRequest {
        InferenceRequest::new(InferenceRole::Delegate, "body tracking").with_tools(vec![
            CapabilitySpec::new("log_weight", "Log body weight")
                .param(ParamSpec::required("kg", ParamKind::Number, "kg")),
        ])
    }

    #[test]
    fn test_message_constructors() {
        let call = ToolCall::new("call_1", "log_weight", r#"{"kg":82}"#);
        let step = Message::assistant_tool_call(call.clone());
        assert_eq!(step.role, MessageRole::Assistant);
        assert_eq!(step.tool_call, Some(call));

        let result = Message::tool_result("ok", "call_1");
        assert_eq!(result.role, MessageRole::Tool);
        assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_parse_raw_json_call() {
        let request = request_with_log_weight();
        let call = parse_tool_calls(
            r#"{"function": "log_weight", "arguments": {"kg": 82}}"#,
            &request,
        )
        .unwrap();
        assert_eq!(call.name, "log_weight");
        assert!(call.arguments.contains("82"));
    }

    #[test]
    fn test_parse_fenced_call_with_prose() {
        let request = request_with_log_weight();
        let content = "Jeg logger det.\n```json\n{\"function\": \"log_weight\", \"arguments\": {\"kg\": 80}}\n```\nFerdig.";
        assert!(parse_tool_calls(content, &request).is_some());
    }

    #[test]
    fn test_parse_marker_call() {
        let request = request_with_log_weight();
        let call = parse_tool_calls(r#"<tool_call>log_weight({"kg": 90})</tool_call>"#, &request)
            .unwrap();
        assert_eq!(call.name, "log_weight");
    }

    #[test]
    fn test_unknown_tool_is_not_a_call() {
        let request = request_with_log_weight();
        let content = r#"{"function": "delete_everything", "arguments": {}}"#;
        assert!(parse_tool_calls(content, &request).is_none());
    }

    #[test]
    fn test_no_tools_means_plain_text() {
        let request = InferenceRequest::new(InferenceRole::Classifier, "classify");
        let content = r#"{"function": "log_weight", "arguments": {}}"#;
        assert!(parse_tool_calls(content, &request).is_none());
    }

    #[test]
    fn test_render_tool_catalog_lists_every_tool() {
        let request = request_with_log_weight();
        let rendered = render_tool_catalog(&request.tools);
        assert!(rendered.contains("log_weight"));
        assert!(rendered.contains("\"function\""));
        assert!(render_tool_catalog(&[]).is_empty());
    }

    #[test]
    fn test_llm_response_serialization() {
        let tool_call = LLMResponse::ToolCall(ToolCall::new("id", "name", "{}"));
        let json = serde_json::to_string(&tool_call).unwrap();
        assert!(json.contains(r#""type":"tool_call"#));

        let final_answer = LLMResponse::FinalAnswer(FinalAnswer::new("svar"));
        let json = serde_json::to_string(&final_answer).unwrap();
        assert!(json.contains(r#""type":"final_answer"#));
    }
}
