//! Tool call shapes: streaming fragments and finalized calls.

use serde::{Deserialize, Serialize};

/// A finalized tool call in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Generate a fresh call id for dialects that do not carry one.
    pub fn generated_id() -> String {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    }
}

/// A tool call under construction from streamed deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub id: String,
    pub name: String,
    pub arguments_so_far: String,
}

impl ToolCallFragment {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Append a delta. A name, once known, is never overwritten by an empty one.
    pub fn push(&mut self, name: Option<&str>, arguments_delta: &str) {
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
            if self.name.is_empty() {
                self.name = name.to_string();
            }
        }
        self.arguments_so_far.push_str(arguments_delta);
    }
}
