//! Accumulate streamed tool-call deltas into finished calls.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use super::extract::{decode_arguments, extract_tool_calls};
use crate::error::LatheError;
use crate::json::{parse_lenient, ParseCache};
use crate::types::{ToolCall, ToolCallFragment};

/// A fragment that could not be turned into a call.
///
/// Scoped to one call: the run loop reports it back to the model as a
/// tool error rather than failing the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionFailure {
    pub id: String,
    pub name: Option<String>,
    pub raw: String,
    pub message: String,
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({}): {}", self.id, self.message),
            None => write!(f, "{}: {}", self.id, self.message),
        }
    }
}

impl From<ExtractionFailure> for LatheError {
    fn from(failure: ExtractionFailure) -> Self {
        LatheError::extraction(failure.name.as_deref(), failure.message)
    }
}

/// Collects `ToolCallDelta`s of one assistant turn, keyed by call id.
///
/// Deltas with an empty id continue the most recent call. Calls keep the
/// order in which their first delta arrived.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    order: Vec<String>,
    fragments: HashMap<String, ToolCallFragment>,
    last_id: Option<String>,
    cache: Option<ParseCache>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse native arguments through `cache`.
    pub fn with_cache(cache: ParseCache) -> Self {
        Self {
            cache: Some(cache),
            ..Self::default()
        }
    }

    /// Record a delta and return the fragment it extended.
    pub fn push(&mut self, id: &str, name: Option<&str>, arguments_delta: &str) -> &ToolCallFragment {
        let id = match (id.trim(), &self.last_id) {
            ("", Some(last)) => last.clone(),
            ("", None) => ToolCall::generated_id(),
            (id, _) => id.to_string(),
        };
        if !self.fragments.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.last_id = Some(id.clone());
        let fragment = self
            .fragments
            .entry(id.clone())
            .or_insert_with(|| ToolCallFragment::new(id));
        fragment.push(name, arguments_delta);
        fragment
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Finished-or-not fragments in arrival order.
    pub fn fragments(&self) -> impl Iterator<Item = &ToolCallFragment> {
        self.order.iter().filter_map(|id| self.fragments.get(id))
    }

    /// Turn every fragment into a call or a scoped failure, clearing state.
    ///
    /// A fragment without a name is treated as inline model text and run
    /// through the dialect extractor; it may yield several calls.
    pub fn finalize(&mut self) -> Vec<Result<ToolCall, ExtractionFailure>> {
        let mut fragments = std::mem::take(&mut self.fragments);
        self.last_id = None;
        let mut results = Vec::new();
        for id in std::mem::take(&mut self.order) {
            let Some(fragment) = fragments.remove(&id) else {
                continue;
            };
            if fragment.name.is_empty() {
                results.extend(finalize_inline(fragment));
            } else {
                results.push(finalize_native(fragment, self.cache.as_ref()));
            }
        }
        results
    }
}

fn finalize_native(
    fragment: ToolCallFragment,
    cache: Option<&ParseCache>,
) -> Result<ToolCall, ExtractionFailure> {
    let failure = |message: String| ExtractionFailure {
        id: fragment.id.clone(),
        name: Some(fragment.name.clone()),
        raw: fragment.arguments_so_far.clone(),
        message,
    };
    let parsed = match cache {
        Some(cache) => cache.parse(&fragment.arguments_so_far),
        None => parse_lenient(&fragment.arguments_so_far),
    }
    .map_err(|e| failure(e.to_string()))?;
    let input = decode_arguments(&parsed).ok_or_else(|| {
        failure(format!(
            "arguments must be a JSON object, got {}",
            value_kind(&parsed)
        ))
    })?;
    Ok(ToolCall::new(fragment.id, fragment.name, input))
}

fn finalize_inline(fragment: ToolCallFragment) -> Vec<Result<ToolCall, ExtractionFailure>> {
    let calls = extract_tool_calls(&fragment.arguments_so_far);
    if calls.is_empty() {
        return vec![Err(ExtractionFailure {
            id: fragment.id,
            name: None,
            raw: fragment.arguments_so_far,
            message: "no recognizable tool call in model output".to_string(),
        })];
    }
    calls
        .into_iter()
        .enumerate()
        .map(|(i, mut call)| {
            if i == 0 && call.id.starts_with("call_") {
                call.id = fragment.id.clone();
            }
            Ok(call)
        })
        .collect()
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
