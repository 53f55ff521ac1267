//! Capability descriptors
//!
//! A capability is described by a name, a natural-language description of
//! when to invoke it, and a typed parameter list. The same descriptor drives
//! argument normalization (`CapabilityArgs::normalize`) and the JSON schema
//! advertised to the inference backend.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// JSON type of a capability parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// Accepted as-is; the executor validates the shape itself
    Any,
}

impl ParamKind {
    fn json_type(self) -> Option<&'static str> {
        match self {
            ParamKind::String => Some("string"),
            ParamKind::Number => Some("number"),
            ParamKind::Integer => Some("integer"),
            ParamKind::Boolean => Some("boolean"),
            ParamKind::Array => Some("array"),
            ParamKind::Object => Some("object"),
            ParamKind::Any => None,
        }
    }
}

/// A single named parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    /// A parameter the caller must supply
    pub fn required(
        name: impl Into<String>,
        kind: ParamKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
            default: None,
        }
    }

    /// A parameter the caller may omit
    pub fn optional(
        name: impl Into<String>,
        kind: ParamKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
            default: None,
        }
    }

    /// Attach a default used when the parameter is omitted or null
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// How long a capability is allowed to run before it is abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityCost {
    /// Single store round trip or a short sub-reasoning pass
    Standard,
    /// Multi-step sub-reasoning over a large payload (e.g. a full plan)
    Extended,
}

/// Descriptor of a capability in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub cost: CapabilityCost,
    /// True when the capability never mutates the record store
    pub read_only: bool,
}

impl CapabilitySpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            cost: CapabilityCost::Standard,
            read_only: false,
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn cost(mut self, cost: CapabilityCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// JSON schema of the parameter object, in the function-calling dialect
    /// understood by OpenAI-compatible backends
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.params {
            let mut prop = Map::new();
            if let Some(ty) = param.kind.json_type() {
                prop.insert("type".to_string(), Value::String(ty.to_string()));
            }
            if param.kind == ParamKind::Array {
                prop.insert("items".to_string(), json!({}));
            }
            prop.insert(
                "description".to_string(),
                Value::String(param.description.clone()),
            );
            if let Some(default) = &param.default {
                prop.insert("default".to_string(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_schema() {
        let spec = CapabilitySpec::new("log_weight", "Log body weight")
            .param(ParamSpec::required("kg", ParamKind::Number, "Weight in kg"))
            .param(ParamSpec::optional("date", ParamKind::String, "ISO date"));

        let schema = spec.parameters_schema();
        assert_eq!(schema["properties"]["kg"]["type"], "number");
        assert_eq!(schema["required"], json!(["kg"]));
    }

    #[test]
    fn test_any_kind_has_no_type() {
        let spec = CapabilitySpec::new("save_training_plan", "Save plan")
            .param(ParamSpec::required("days", ParamKind::Any, "Plan days"));
        let schema = spec.parameters_schema();
        assert!(schema["properties"]["days"].get("type").is_none());
    }
}
