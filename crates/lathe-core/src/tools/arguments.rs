//! Typed access to tool call arguments.

use serde_json::Value;

use crate::error::{LatheError, Result};

/// Wrapper around a call's `input` providing typed extraction.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn raw(&self) -> &Value {
        &self.value
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.value
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| missing("string", key))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    /// Integer argument. Accepts numeric strings, which models emit often.
    pub fn get_i64(&self, key: &str) -> Result<i64> {
        self.get_i64_opt(key).ok_or_else(|| missing("integer", key))
    }

    pub fn get_i64_opt(&self, key: &str) -> Option<i64> {
        match self.value.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean argument. Accepts `"true"`/`"false"` strings.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get_bool_opt(key).ok_or_else(|| missing("boolean", key))
    }

    pub fn get_bool_opt(&self, key: &str) -> Option<bool> {
        match self.value.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_array(&self, key: &str) -> Result<&Vec<Value>> {
        self.value
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| missing("array", key))
    }

    /// Deserialize the whole argument object into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            LatheError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

fn missing(kind: &str, key: &str) -> LatheError {
    LatheError::InvalidArgument(format!("Missing {kind} argument: {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_getters_accept_stringly_typed_values() {
        let args = ToolArguments::new(json!({"limit": "40", "all": "true", "path": "a"}));
        assert_eq!(args.get_i64("limit").unwrap(), 40);
        assert!(args.get_bool("all").unwrap());
        assert_eq!(args.get_str("path").unwrap(), "a");
    }

    #[test]
    fn missing_arguments_name_the_key() {
        let args = ToolArguments::new(json!({}));
        let err = args.get_str("path").unwrap_err();
        assert!(err.to_string().contains("path"));
    }

    #[test]
    fn deserialize_into_struct() {
        #[derive(serde::Deserialize)]
        struct Params {
            path: String,
            #[serde(default)]
            limit: Option<u32>,
        }
        let params: Params = ToolArguments::new(json!({"path": "x"})).deserialize().unwrap();
        assert_eq!(params.path, "x");
        assert_eq!(params.limit, None);
    }
}
