//! Capability input/output types

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{ParamKind, ParamSpec};

/// Arguments passed to a capability, as produced by the inference step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityArgs {
    pub params: Map<String, Value>,
}

impl CapabilityArgs {
    /// Create an empty argument set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse arguments from the raw JSON text emitted by a model
    ///
    /// Blank input is treated as an empty object. Anything other than a JSON
    /// object is rejected.
    pub fn from_json_str(raw: &str) -> Result<Self, ArgError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::new());
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(params)) => Ok(Self { params }),
            Ok(other) => Err(ArgError::NotAnObject(type_name(&other).to_string())),
            Err(e) => Err(ArgError::MalformedJson(e.to_string())),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Get a raw parameter value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Apply a parameter schema: check required parameters, coerce loosely
    /// typed values (numbers sent as strings, arrays sent as JSON text) and
    /// fill in declared defaults.
    ///
    /// Parameters not named by the schema are dropped.
    pub fn normalize(&self, specs: &[ParamSpec]) -> Result<Map<String, Value>, ArgError> {
        let mut out = Map::new();
        for spec in specs {
            match self.params.get(&spec.name) {
                Some(Value::Null) | None => {
                    if let Some(default) = &spec.default {
                        out.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        return Err(ArgError::MissingParameter(spec.name.clone()));
                    }
                }
                Some(value) => {
                    out.insert(spec.name.clone(), coerce(&spec.name, spec.kind, value)?);
                }
            }
        }
        Ok(out)
    }

    /// Normalize against `specs` and deserialize into a typed argument struct
    pub fn parse<T: DeserializeOwned>(&self, specs: &[ParamSpec]) -> Result<T, ArgError> {
        let normalized = self.normalize(specs)?;
        serde_json::from_value(Value::Object(normalized))
            .map_err(|e| ArgError::InvalidParameter(e.to_string()))
    }

    /// Render the arguments as compact JSON for audit logging
    pub fn to_json(&self) -> String {
        Value::Object(self.params.clone()).to_string()
    }
}

fn coerce(name: &str, kind: ParamKind, value: &Value) -> Result<Value, ArgError> {
    let invalid = |expected: &str| {
        ArgError::InvalidParameter(format!(
            "{} must be {}, got {}",
            name,
            expected,
            type_name(value)
        ))
    };

    match kind {
        ParamKind::Any => Ok(value.clone()),
        ParamKind::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(invalid("a string")),
        },
        ParamKind::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .replace(',', ".")
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::from)
                .ok_or_else(|| invalid("a number")),
            _ => Err(invalid("a number")),
        },
        ParamKind::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| Value::from(f as i64))
                .ok_or_else(|| invalid("an integer")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid("an integer")),
            _ => Err(invalid("an integer")),
        },
        ParamKind::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            _ => Err(invalid("a boolean")),
        },
        ParamKind::Array => match value {
            Value::Array(_) => Ok(value.clone()),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed @ Value::Array(_)) => Ok(parsed),
                _ => Err(invalid("a list")),
            },
            _ => Err(invalid("a list")),
        },
        ParamKind::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            _ => Err(invalid("an object")),
        },
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Structured outcome of a task executor
///
/// `message` is user-facing and written in the conversation language.
/// `error` carries technical detail for logs and audit only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl ExecutionResult {
    /// Create a successful result
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            data: Value::Null,
        }
    }

    /// Create a successful result carrying structured data
    pub fn with_data(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            data,
        }
    }

    /// Create a failure result
    pub fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.into()),
            data: Value::Null,
        }
    }

    /// Serialize to the JSON text handed back to the router
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"success\":{},\"message\":{:?}}}",
                self.success, self.message
            )
        })
    }
}

/// Argument errors raised before any executor work happens
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArgError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Arguments must be a JSON object, got {0}")]
    NotAnObject(String),

    #[error("Malformed arguments JSON: {0}")]
    MalformedJson(String),
}
