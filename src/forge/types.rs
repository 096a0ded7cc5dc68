//! Types shared by the tool generation pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::RiskTier;

/// Declared type of a generated tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Str,
    Int,
    Float,
    Bool,
    List,
    Dict,
}

impl ParamType {
    /// Parse a type name, accepting common aliases (`string`, `integer`, `number`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "str" | "string" => Some(ParamType::Str),
            "int" | "integer" => Some(ParamType::Int),
            "float" | "number" | "double" => Some(ParamType::Float),
            "bool" | "boolean" => Some(ParamType::Bool),
            "list" | "array" => Some(ParamType::List),
            "dict" | "object" | "map" => Some(ParamType::Dict),
            _ => None,
        }
    }

    /// JSON schema type name.
    pub fn json_type(&self) -> &'static str {
        match self {
            ParamType::Str => "string",
            ParamType::Int => "integer",
            ParamType::Float => "number",
            ParamType::Bool => "boolean",
            ParamType::List => "array",
            ParamType::Dict => "object",
        }
    }

    /// Deterministic sample value used in example invocations.
    pub fn example_value(&self, param_name: &str) -> Value {
        match self {
            ParamType::Str => json!(format!("{}_value", param_name)),
            ParamType::Int => json!(42),
            ParamType::Float => json!(3.14),
            ParamType::Bool => json!(true),
            ParamType::List => json!([1, 2, 3]),
            ParamType::Dict => json!({"key": "value"}),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParamType::Str => "str",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::List => "list",
            ParamType::Dict => "dict",
        };
        write!(f, "{}", s)
    }
}

/// One declared parameter of a generated tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub description: String,
}

impl ParamSpec {
    pub fn new(name: &str, ty: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            ty,
            description: description.to_string(),
        }
    }
}

/// JSON schema for a parameter list; every parameter is required.
pub fn parameters_schema(params: &[ParamSpec]) -> Value {
    let mut properties = serde_json::Map::new();
    for p in params {
        properties.insert(
            p.name.clone(),
            json!({"type": p.ty.json_type(), "description": p.description}),
        );
    }
    let required: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// A generated, not-yet-approved tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProposal {
    /// Tool name (snake_case)
    pub name: String,
    /// One-line description shown to the model
    pub description: String,
    /// Declared parameters
    pub parameters: Vec<ParamSpec>,
    /// Complete tool source (decorator, signature, doc comment, body)
    pub source: String,
    /// Risk tier declared by the generator
    pub risk_tier: RiskTier,
    /// Why the tool is needed
    pub rationale: String,
    /// Example call arguments
    pub example_invocation: Value,
}

impl ToolProposal {
    /// Human readable example call, e.g. `convert(celsius=3.14)`.
    pub fn example_call(&self) -> String {
        let args: Vec<String> = self
            .parameters
            .iter()
            .map(|p| {
                let v = self
                    .example_invocation
                    .get(&p.name)
                    .cloned()
                    .unwrap_or(Value::Null);
                format!("{}={}", p.name, v)
            })
            .collect();
        format!("{}({})", self.name, args.join(", "))
    }
}

/// Durable record of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    /// First 16 hex chars of the source's SHA-256
    pub hash: String,
    /// Source file name, relative to the registry directory
    pub file: String,
    pub description: String,
    pub risk_tier: RiskTier,
    pub parameters: Vec<ParamSpec>,
    pub created_at: DateTime<Utc>,
    pub approved_by: String,
    pub rationale: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_type_aliases() {
        assert_eq!(ParamType::parse("string"), Some(ParamType::Str));
        assert_eq!(ParamType::parse("INT"), Some(ParamType::Int));
        assert_eq!(ParamType::parse("number"), Some(ParamType::Float));
        assert_eq!(ParamType::parse("object"), Some(ParamType::Dict));
        assert_eq!(ParamType::parse("tuple"), None);
    }

    #[test]
    fn test_example_values() {
        assert_eq!(ParamType::Str.example_value("city"), json!("city_value"));
        assert_eq!(ParamType::Int.example_value("n"), json!(42));
        assert_eq!(ParamType::Float.example_value("x"), json!(3.14));
        assert_eq!(ParamType::Bool.example_value("b"), json!(true));
        assert_eq!(ParamType::List.example_value("l"), json!([1, 2, 3]));
        assert_eq!(ParamType::Dict.example_value("d"), json!({"key": "value"}));
    }

    #[test]
    fn test_parameters_schema() {
        let schema = parameters_schema(&[
            ParamSpec::new("celsius", ParamType::Float, "Temperature"),
            ParamSpec::new("label", ParamType::Str, "Label"),
        ]);
        assert_eq!(schema["properties"]["celsius"]["type"], "number");
        assert_eq!(schema["required"], json!(["celsius", "label"]));
    }

    #[test]
    fn test_param_spec_serializes_type_key() {
        let spec = ParamSpec::new("n", ParamType::Int, "count");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "int");
    }
}
