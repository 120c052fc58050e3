//! Recognize tool calls in model text.
//!
//! Dialects are tried in a fixed order and the first one that yields a
//! structurally valid call wins:
//!
//! 1. a JSON object or array (`{"name", "arguments"}`, OpenAI `function`
//!    and `tool_calls` shapes), optionally wrapped in `<tool_call>` tags
//! 2. `<invoke name=".."><parameter name="..">..</parameter></invoke>`
//! 3. fenced code blocks
//! 4. compact `functions.NAME:ID>{..}` markers and `<|tool_sep|>NAME` forms
//! 5. the span from the first `{` to the last `}`, repaired
//!
//! Reasoning blocks are removed first.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::json::parse_lenient;
use crate::types::ToolCall;

/// How many times a string-encoded argument payload is unwrapped.
const MAX_ARGUMENT_DECODE_DEPTH: usize = 3;

// Patterns are constants; compiling them cannot fail at runtime.
macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: LazyLock<Regex> = LazyLock::new(|| {
                Regex::new($pattern).expect(concat!(stringify!($name), " regex must compile"))
            });
            &RE
        }
    };
}

static_regex!(think_block, r"(?s)<think>.*?(?:</think>|\z)");
static_regex!(hermes_block, r"(?s)<tool_call>\s*(.*?)\s*(?:</tool_call>|\z)");
static_regex!(
    invoke_block,
    r#"(?s)<invoke\s+name\s*=\s*["']([^"']+)["']\s*>(.*?)(?:</invoke>|\z)"#
);
static_regex!(
    parameter_block,
    r#"(?s)<parameter\s+name\s*=\s*["']([^"']+)["']\s*>(.*?)(?:</parameter>|\z)"#
);
static_regex!(fenced_block, r"(?s)```[A-Za-z_]*[ \t]*\n?(.*?)(?:```|\z)");
static_regex!(
    compact_marker,
    r"(?:(functions)\.)?([A-Za-z_][\w\-]*):(\d+)\s*(?:>|<\|tool_call_argument_begin\|>)\s*"
);
static_regex!(separator_marker, r"<\|tool_sep\|>\s*([A-Za-z_][\w\-.]*)");
static_regex!(tool_name, r"^[A-Za-z_][\w\-.]*$");

/// Extract the first tool call in `text`.
pub fn extract_tool_call(text: &str) -> Option<ToolCall> {
    extract_tool_calls(text).into_iter().next()
}

/// Extract every tool call from the first dialect that matches.
pub fn extract_tool_calls(text: &str) -> Vec<ToolCall> {
    let cleaned = strip_reasoning(text);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Vec::new();
    }

    let dialects: [fn(&str) -> Vec<ToolCall>; 5] = [
        from_json_document,
        from_invoke_blocks,
        from_fenced_blocks,
        from_compact_markers,
        from_brace_span,
    ];
    for dialect in dialects {
        let calls = dialect(cleaned);
        if !calls.is_empty() {
            return calls;
        }
    }
    Vec::new()
}

/// Remove `<think>` blocks, including an unterminated trailing one.
pub fn strip_reasoning(text: &str) -> String {
    think_block().replace_all(text, "").into_owned()
}

fn from_json_document(text: &str) -> Vec<ToolCall> {
    if text.contains("<tool_call>") {
        return hermes_block()
            .captures_iter(text)
            .flat_map(|c| from_json_document(c[1].trim()))
            .collect();
    }
    if !(text.starts_with('{') || text.starts_with('[')) {
        return Vec::new();
    }
    match parse_lenient(text) {
        Ok(value) => calls_from_value(&value),
        Err(_) => Vec::new(),
    }
}

fn from_invoke_blocks(text: &str) -> Vec<ToolCall> {
    invoke_block()
        .captures_iter(text)
        .filter_map(|c| {
            let name = c[1].trim();
            if !is_valid_name(name) {
                return None;
            }
            let mut input = Map::new();
            for p in parameter_block().captures_iter(&c[2]) {
                input.insert(p[1].trim().to_string(), coerce_literal(&p[2]));
            }
            Some(ToolCall::new(ToolCall::generated_id(), name, Value::Object(input)))
        })
        .collect()
}

fn from_fenced_blocks(text: &str) -> Vec<ToolCall> {
    fenced_block()
        .captures_iter(text)
        .flat_map(|c| {
            let body = c[1].trim();
            if body.starts_with('{') || body.starts_with('[') {
                parse_lenient(body)
                    .map(|value| calls_from_value(&value))
                    .unwrap_or_default()
            } else {
                Vec::new()
            }
        })
        .collect()
}

fn from_compact_markers(text: &str) -> Vec<ToolCall> {
    let mut calls: Vec<ToolCall> = compact_marker()
        .captures_iter(text)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let name = c.get(2)?.as_str();
            let index = c.get(3)?.as_str();
            let id = match c.get(1) {
                Some(_) => format!("functions.{name}:{index}"),
                None => format!("{name}:{index}"),
            };
            let payload = balanced_object_from(text, whole.end())?;
            let input = decode_arguments(&Value::String(payload.to_string()))?;
            Some(ToolCall::new(id, name, input))
        })
        .collect();
    if !calls.is_empty() {
        return calls;
    }

    calls = separator_marker()
        .captures_iter(text)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let name = c.get(1)?.as_str();
            let brace = text[whole.end()..].find('{')? + whole.end();
            let payload = balanced_object_from(text, brace)?;
            let input = decode_arguments(&Value::String(payload.to_string()))?;
            Some(ToolCall::new(ToolCall::generated_id(), name, input))
        })
        .collect();
    calls
}

fn from_brace_span(text: &str) -> Vec<ToolCall> {
    let Some(start) = text.find('{') else {
        return Vec::new();
    };
    let end = text.rfind('}').filter(|end| *end > start).map_or(text.len(), |e| e + 1);
    parse_lenient(&text[start..end])
        .map(|value| calls_from_value(&value))
        .unwrap_or_default()
}

/// Normalize any of the JSON call shapes into tool calls.
pub(crate) fn calls_from_value(value: &Value) -> Vec<ToolCall> {
    match value {
        Value::Array(items) => items.iter().flat_map(calls_from_value).collect(),
        Value::Object(object) => {
            if let Some(Value::Array(calls)) = object.get("tool_calls") {
                return calls.iter().flat_map(calls_from_value).collect();
            }
            call_from_object(object).into_iter().collect()
        }
        _ => Vec::new(),
    }
}

fn call_from_object(object: &Map<String, Value>) -> Option<ToolCall> {
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(ToolCall::generated_id);

    let (name, arguments) = match object.get("function") {
        Some(Value::Object(function)) => (
            function.get("name").and_then(Value::as_str)?,
            argument_field(function),
        ),
        _ => (object.get("name").and_then(Value::as_str)?, argument_field(object)),
    };
    if !is_valid_name(name) {
        return None;
    }
    let input = match arguments {
        Some(raw) => decode_arguments(raw)?,
        None => Value::Object(Map::new()),
    };
    Some(ToolCall::new(id, name, input))
}

fn argument_field(object: &Map<String, Value>) -> Option<&Value> {
    ["arguments", "input", "parameters", "args"]
        .iter()
        .find_map(|key| object.get(*key))
}

/// Turn an argument payload into an object, unwrapping string encodings.
pub(crate) fn decode_arguments(raw: &Value) -> Option<Value> {
    let mut current = raw.clone();
    for _ in 0..MAX_ARGUMENT_DECODE_DEPTH {
        match current {
            Value::Object(_) => return Some(current),
            Value::Null => return Some(Value::Object(Map::new())),
            Value::String(text) => current = parse_lenient(&text).ok()?,
            _ => return None,
        }
    }
    current.is_object().then_some(current)
}

/// Interpret a raw parameter body: literals, numbers and JSON become typed
/// values, everything else stays text.
pub(crate) fn coerce_literal(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    if looks_numeric(trimmed) {
        if let Some(number) = trimmed.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(number);
        }
    }
    if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed).or_else(|_| parse_lenient(trimmed)) {
            return value;
        }
    }
    let body = raw.strip_prefix('\n').unwrap_or(raw);
    let body = body.strip_suffix('\n').unwrap_or(body);
    Value::String(body.to_string())
}

fn looks_numeric(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        && text.chars().any(|c| c.is_ascii_digit())
}

fn is_valid_name(name: &str) -> bool {
    tool_name().is_match(name)
}

/// Slice from the `{` at `start` to its matching `}` (or the end of text).
fn balanced_object_from(text: &str, start: usize) -> Option<&str> {
    let rest = &text[start..];
    if !rest.starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in rest.char_indices() {
        if in_string {
            match (escaped, c) {
                (true, _) => escaped = false,
                (false, '\\') => escaped = true,
                (false, '"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&rest[..offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    Some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn plain_json_object() {
        let call = extract_tool_call(r#"{"name": "read_file", "arguments": {"path": "a.rs"}}"#)
            .unwrap();
        assert_eq!(call.name, "read_file");
        assert_eq!(call.input, json!({"path": "a.rs"}));
        assert!(call.id.starts_with("call_"));
    }

    #[test]
    fn openai_function_shape_with_string_arguments() {
        let call = extract_tool_call(
            r#"{"id": "call_9", "type": "function", "function": {"name": "grep", "arguments": "{\"pattern\": \"fn main\"}"}}"#,
        )
        .unwrap();
        assert_eq!(call.id, "call_9");
        assert_eq!(call.input, json!({"pattern": "fn main"}));
    }

    #[test]
    fn tool_calls_array_yields_every_call() {
        let calls = extract_tool_calls(
            r#"{"tool_calls": [{"name": "a", "input": {}}, {"name": "b", "parameters": {"x": 1}}]}"#,
        );
        let names: Vec<_> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(calls[1].input, json!({"x": 1}));
    }

    #[test]
    fn truncated_json_is_repaired() {
        let call = extract_tool_call(r#"{"name": "write_file", "input": {"path": "a.rs", "content": "fn"#)
            .unwrap();
        assert_eq!(call.input, json!({"path": "a.rs", "content": "fn"}));
    }

    #[test]
    fn hermes_wrapped_calls() {
        let calls = extract_tool_calls(
            "<tool_call>\n{\"name\": \"a\", \"arguments\": {}}\n</tool_call>\n<tool_call>{\"name\": \"b\", \"arguments\": {}}</tool_call>",
        );
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn invoke_parameters_are_coerced() {
        let text = r#"I'll look.
<function_calls>
<invoke name="read_file">
<parameter name="path">src/main.rs</parameter>
<parameter name="limit">40</parameter>
<parameter name="follow">true</parameter>
<parameter name="range">{"start": 1, "end": 2,}</parameter>
</invoke>
</function_calls>"#;
        let call = extract_tool_call(text).unwrap();
        assert_eq!(call.name, "read_file");
        assert_eq!(
            call.input,
            json!({"path": "src/main.rs", "limit": 40, "follow": true, "range": {"start": 1, "end": 2}})
        );
    }

    #[test]
    fn fenced_block_inside_prose() {
        let text = "Sure, running it now:\n```json\n{\"name\": \"shell\", \"arguments\": {\"command\": \"ls\"}}\n```\nDone.";
        let call = extract_tool_call(text).unwrap();
        assert_eq!(call.name, "shell");
        assert_eq!(call.input, json!({"command": "ls"}));
    }

    #[test]
    fn compact_marker_form() {
        let call = extract_tool_call(r#"functions.read_file:0>{"path": "lib.rs"}"#).unwrap();
        assert_eq!(call.id, "functions.read_file:0");
        assert_eq!(call.name, "read_file");
        assert_eq!(call.input, json!({"path": "lib.rs"}));

        let call = extract_tool_call(
            r#"functions.grep:3<|tool_call_argument_begin|>{"pattern": "x"}"#,
        )
        .unwrap();
        assert_eq!(call.id, "functions.grep:3");
    }

    #[test]
    fn separator_form_with_fenced_arguments() {
        let text = "function<|tool_sep|>list_directory\n```json\n{\"path\": \".\"}\n```";
        let call = extract_tool_call(text).unwrap();
        assert_eq!(call.name, "list_directory");
        assert_eq!(call.input, json!({"path": "."}));
    }

    #[test]
    fn brace_scan_fallback_ignores_surrounding_prose() {
        let text = r#"Let me call {"name": "grep", "arguments": {"pattern": "todo"}} and see."#;
        let call = extract_tool_call(text).unwrap();
        assert_eq!(call.name, "grep");
    }

    #[test]
    fn reasoning_is_stripped_before_parsing() {
        let text = r#"<think>maybe {"name": "wrong"}</think>{"name": "right", "arguments": {}}"#;
        assert_eq!(extract_tool_call(text).unwrap().name, "right");
    }

    #[test]
    fn no_call_yields_nothing() {
        assert!(extract_tool_calls("just some prose").is_empty());
        assert!(extract_tool_calls(r#"{"message": "no name here"}"#).is_empty());
        assert!(extract_tool_calls("").is_empty());
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(extract_tool_call(r#"{"name": "rm -rf /", "arguments": {}}"#).is_none());
    }

    #[test]
    fn coerce_literal_keeps_text_and_trims_wrapping_newlines() {
        assert_eq!(coerce_literal("\nfn main() {}\n"), json!("fn main() {}"));
        assert_eq!(coerce_literal(" 2.5 "), json!(2.5));
        assert_eq!(coerce_literal("null"), Value::Null);
        assert_eq!(coerce_literal("1.2.3"), json!("1.2.3"));
    }

    #[test]
    fn double_encoded_arguments_are_unwrapped() {
        let raw = Value::String(r#""{\"a\": 1}""#.to_string());
        assert_eq!(decode_arguments(&raw), Some(json!({"a": 1})));
    }
}
