//! Tool parameter schemas, definitions and argument validation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// JSON Schema describing a tool's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    pub schema: Value,
}

impl ToolParameters {
    pub fn from_schema(schema: Value) -> Self {
        Self { schema }
    }

    pub fn empty() -> Self {
        Self {
            schema: json!({"type": "object", "properties": {}, "required": []}),
        }
    }

    pub fn object() -> ParameterBuilder {
        ParameterBuilder {
            properties: Map::new(),
            required: Vec::new(),
        }
    }

    /// Check `args` against the top level of the schema.
    ///
    /// Covers the object type, required fields and property types; nested
    /// schemas are not descended into.
    pub fn validate(&self, args: &Value) -> Result<(), String> {
        let schema = &self.schema;
        if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
            return Err(format!("expected object arguments, got {}", type_name(args)));
        }
        let Some(object) = args.as_object() else {
            return Ok(());
        };
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    return Err(format!("missing required field '{name}'"));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, value) in object {
                let expected = properties
                    .get(key)
                    .and_then(|p| p.get("type"))
                    .and_then(Value::as_str);
                if let Some(expected) = expected {
                    if !matches_type(value, expected) {
                        return Err(format!(
                            "field '{key}' expected type '{expected}', got {}",
                            type_name(value)
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Builder for object parameter schemas.
pub struct ParameterBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    fn property(mut self, name: impl Into<String>, schema: Value, required: bool) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if required {
            self.required.push(name);
        }
        self
    }

    pub fn string(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.property(
            name,
            json!({"type": "string", "description": description.into()}),
            required,
        )
    }

    pub fn integer(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.property(
            name,
            json!({"type": "integer", "description": description.into()}),
            required,
        )
    }

    pub fn boolean(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.property(
            name,
            json!({"type": "boolean", "description": description.into()}),
            required,
        )
    }

    /// Array property whose items follow `items`.
    pub fn array(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        items: Value,
        required: bool,
    ) -> Self {
        self.property(
            name,
            json!({"type": "array", "description": description.into(), "items": items}),
            required,
        )
    }

    pub fn build(self) -> ToolParameters {
        ToolParameters {
            schema: json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}

/// What a transport needs to advertise a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ToolParameters {
        ToolParameters::object()
            .string("path", "file", true)
            .integer("limit", "lines", false)
            .build()
    }

    #[test]
    fn accepts_valid_arguments() {
        assert!(params().validate(&json!({"path": "a", "limit": 3})).is_ok());
    }

    #[test]
    fn reports_missing_required_field() {
        let err = params().validate(&json!({"limit": 3})).unwrap_err();
        assert_eq!(err, "missing required field 'path'");
    }

    #[test]
    fn reports_type_mismatch() {
        let err = params().validate(&json!({"path": 7})).unwrap_err();
        assert!(err.contains("expected type 'string'"));
    }

    #[test]
    fn rejects_non_object_arguments() {
        assert!(params().validate(&json!([1])).is_err());
    }
}
