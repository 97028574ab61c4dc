// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_model::ToolSchema;

/// One parameter of a tool operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSpec {
    /// JSON type name: "string" | "number" | "integer" | "boolean" |
    /// "array" | "object"
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Allowed values; non-empty lists are enforced during validation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub r#enum: Vec<Value>,
}

/// One operation of a multi-operation tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationSpec {
    #[serde(default)]
    pub params: HashMap<String, ParamSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

/// Descriptor for a tool as advertised to the model.
///
/// Tools with a single implicit operation leave `operations` empty and rely
/// on their own `validate` implementation; multi-operation tools (browser,
/// filesystem) dispatch on an `"operation"` argument, which the registry
/// pre-validates against this map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub operations: HashMap<String, OperationSpec>,
}

impl ToolDefinition {
    /// Render as the JSON-schema shape providers expect.
    pub fn to_schema(&self) -> ToolSchema {
        let parameters = if self.operations.is_empty() {
            serde_json::json!({ "type": "object" })
        } else {
            let mut op_names: Vec<&String> = self.operations.keys().collect();
            op_names.sort();
            serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string", "enum": op_names },
                },
                "required": ["operation"],
            })
        };
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters,
        }
    }

    /// Structural validation of an argument object against this definition:
    /// operation membership, required parameters, enum membership.
    pub fn validate_args(&self, args: &Value) -> Validation {
        if self.operations.is_empty() {
            return Validation::Valid;
        }
        let Some(op_name) = args.get("operation").and_then(Value::as_str) else {
            return Validation::invalid(format!(
                "{}: missing required \"operation\" argument",
                self.name
            ));
        };
        let Some(op) = self.operations.get(op_name) else {
            let mut known: Vec<&String> = self.operations.keys().collect();
            known.sort();
            return Validation::invalid(format!(
                "{}: unknown operation {op_name:?} (expected one of {known:?})",
                self.name
            ));
        };
        for required in &op.required {
            if args.get(required).map_or(true, Value::is_null) {
                return Validation::invalid(format!(
                    "{}.{op_name}: missing required parameter {required:?}",
                    self.name
                ));
            }
        }
        for (param, spec) in &op.params {
            if spec.r#enum.is_empty() {
                continue;
            }
            if let Some(value) = args.get(param) {
                if !value.is_null() && !spec.r#enum.contains(value) {
                    return Validation::invalid(format!(
                        "{}.{op_name}: parameter {param:?} must be one of {:?}",
                        self.name, spec.r#enum
                    ));
                }
            }
        }
        Validation::Valid
    }
}

/// Result of synchronous argument validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid(String),
}

impl Validation {
    pub fn invalid(error: impl Into<String>) -> Self {
        Self::Invalid(error.into())
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Trait every tool implements.
///
/// `execute` returns the tool's string output (tools serialise structured
/// output to JSON themselves); a returned `Err` becomes an error result in
/// the round, it does not abort the session.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Synchronous argument validation beyond the structural checks derived
    /// from the definition.  The default accepts everything.
    fn validate(&self, _args: &Value) -> Validation {
        Validation::Valid
    }

    /// Execute the tool.  `session_id` scopes session-owned resources
    /// (browser session, latest screenshot).
    async fn execute(&self, args: Value, session_id: Option<&str>) -> anyhow::Result<String>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn browserish_definition() -> ToolDefinition {
        let mut operations = HashMap::new();
        operations.insert(
            "click".to_string(),
            OperationSpec {
                params: HashMap::from([(
                    "index".to_string(),
                    ParamSpec {
                        kind: Some("integer".into()),
                        ..Default::default()
                    },
                )]),
                required: vec!["index".to_string()],
            },
        );
        operations.insert(
            "scroll".to_string(),
            OperationSpec {
                params: HashMap::from([(
                    "direction".to_string(),
                    ParamSpec {
                        r#enum: vec![json!("up"), json!("down")],
                        ..Default::default()
                    },
                )]),
                required: vec![],
            },
        );
        ToolDefinition {
            name: "browser".into(),
            description: "drive the session browser".into(),
            operations,
        }
    }

    #[test]
    fn empty_operations_accept_anything() {
        let def = ToolDefinition {
            name: "echo".into(),
            description: "".into(),
            operations: HashMap::new(),
        };
        assert!(def.validate_args(&json!({"whatever": 1})).is_valid());
    }

    #[test]
    fn missing_operation_is_invalid() {
        let def = browserish_definition();
        let v = def.validate_args(&json!({"index": 1}));
        assert!(matches!(v, Validation::Invalid(ref e) if e.contains("operation")));
    }

    #[test]
    fn unknown_operation_is_invalid() {
        let def = browserish_definition();
        let v = def.validate_args(&json!({"operation": "fly"}));
        assert!(matches!(v, Validation::Invalid(ref e) if e.contains("fly")));
    }

    #[test]
    fn missing_required_param_is_invalid() {
        let def = browserish_definition();
        let v = def.validate_args(&json!({"operation": "click"}));
        assert!(matches!(v, Validation::Invalid(ref e) if e.contains("index")));
    }

    #[test]
    fn enum_membership_enforced() {
        let def = browserish_definition();
        assert!(def
            .validate_args(&json!({"operation": "scroll", "direction": "down"}))
            .is_valid());
        let v = def.validate_args(&json!({"operation": "scroll", "direction": "left"}));
        assert!(matches!(v, Validation::Invalid(_)));
    }

    #[test]
    fn valid_call_passes() {
        let def = browserish_definition();
        assert!(def
            .validate_args(&json!({"operation": "click", "index": 3}))
            .is_valid());
    }

    #[test]
    fn schema_lists_operations() {
        let def = browserish_definition();
        let schema = def.to_schema();
        assert_eq!(schema.name, "browser");
        let ops = schema.parameters["properties"]["operation"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(ops.len(), 2);
    }
}
