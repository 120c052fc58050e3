//! Best-effort repair of truncated or malformed JSON.
//!
//! Tool arguments arrive token by token and models routinely emit
//! JavaScript-flavoured objects. The repairer walks the text once, tracking
//! a bracket stack and a per-frame slot (key expected, key done, value
//! expected, value done) so that it can close whatever the stream left open.

use serde_json::Value;

use crate::error::{LatheError, Result};

/// Repair `text` into syntactically valid JSON where possible.
///
/// Well-formed input is returned unchanged with `false`. The returned flag
/// is `true` only when the output differs from the input.
pub fn repair(text: &str) -> (String, bool) {
    if serde_json::from_str::<serde::de::IgnoredAny>(text).is_ok() {
        return (text.to_string(), false);
    }
    let repaired = Repairer::new(text.len()).run(text);
    let modified = repaired != text;
    (repaired, modified)
}

/// Parse `text` as JSON, repairing it first if necessary.
///
/// Empty input is treated as an empty argument object. Anything the
/// repairer cannot fix is an [`LatheError::Extraction`].
pub fn parse_lenient(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    let (repaired, _) = repair(trimmed);
    serde_json::from_str::<Value>(&repaired)
        .map_err(|e| LatheError::extraction(None, format!("unrepairable JSON: {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    KeyExpected,
    KeyDone,
    ValueExpected,
    ValueDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Object(Slot),
    Array(Slot),
}

impl Frame {
    fn closer(self) -> char {
        match self {
            Frame::Object(_) => '}',
            Frame::Array(_) => ']',
        }
    }
}

struct Repairer {
    out: String,
    stack: Vec<Frame>,
    /// Quote character of the string currently open, if any.
    in_string: Option<char>,
    string_is_key: bool,
    string_start: usize,
    escaped: bool,
    /// Bare word most recently written in value position.
    last_word: Option<String>,
}

impl Repairer {
    fn new(capacity: usize) -> Self {
        Self {
            out: String::with_capacity(capacity + 16),
            stack: Vec::new(),
            in_string: None,
            string_is_key: false,
            string_start: 0,
            escaped: false,
            last_word: None,
        }
    }

    fn run(mut self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if let Some(quote) = self.in_string {
                self.push_string_char(quote, c);
                i += 1;
                continue;
            }
            match c {
                c @ ('"' | '\'') => self.open_string(c),
                '{' => {
                    self.last_word = None;
                    self.out.push('{');
                    self.stack.push(Frame::Object(Slot::KeyExpected));
                }
                '[' => {
                    self.last_word = None;
                    self.out.push('[');
                    self.stack.push(Frame::Array(Slot::ValueExpected));
                }
                '}' | ']' => self.close(c),
                ',' => {
                    self.last_word = None;
                    self.out.push(',');
                    self.set_slot_after_comma();
                }
                ':' => {
                    self.last_word = None;
                    self.out.push(':');
                    if let Some(Frame::Object(slot)) = self.stack.last_mut() {
                        *slot = Slot::ValueExpected;
                    }
                }
                c if is_word_start(c) => {
                    let key_position = matches!(self.stack.last(), Some(Frame::Object(Slot::KeyExpected)));
                    let start = i;
                    while i < chars.len() && is_word_char(chars[i], key_position) {
                        i += 1;
                    }
                    let word: String = chars[start..i].iter().collect();
                    self.push_word(word, key_position);
                    continue;
                }
                c if c.is_whitespace() => self.out.push(c),
                c => {
                    self.last_word = None;
                    self.out.push(c);
                    self.finish_value();
                }
            }
            i += 1;
        }
        self.finish()
    }

    fn push_string_char(&mut self, quote: char, c: char) {
        if self.escaped {
            self.escaped = false;
            if quote == '\'' && c == '\'' {
                // `\'` is not a valid JSON escape.
                self.out.pop();
                self.out.push('\'');
            } else {
                self.out.push(c);
            }
            return;
        }
        match c {
            '\\' => {
                self.out.push('\\');
                self.escaped = true;
            }
            c if c == quote => {
                self.out.push('"');
                self.close_string();
            }
            '"' => self.out.push_str("\\\""),
            '\n' => self.out.push_str("\\n"),
            '\r' => self.out.push_str("\\r"),
            '\t' => self.out.push_str("\\t"),
            c if (c as u32) < 0x20 => self.out.push_str(&format!("\\u{:04x}", c as u32)),
            c => self.out.push(c),
        }
    }

    fn open_string(&mut self, quote: char) {
        self.last_word = None;
        self.string_is_key = matches!(self.stack.last(), Some(Frame::Object(Slot::KeyExpected)));
        self.string_start = self.out.len();
        self.out.push('"');
        self.in_string = Some(quote);
    }

    fn close_string(&mut self) {
        self.in_string = None;
        if self.string_is_key {
            if let Some(Frame::Object(slot)) = self.stack.last_mut() {
                *slot = Slot::KeyDone;
            }
        } else {
            self.finish_value();
        }
        self.string_is_key = false;
    }

    fn push_word(&mut self, word: String, key_position: bool) {
        if key_position {
            self.out.push('"');
            self.out.push_str(&word);
            self.out.push('"');
            if let Some(Frame::Object(slot)) = self.stack.last_mut() {
                *slot = Slot::KeyDone;
            }
            self.last_word = None;
            return;
        }
        let mapped = match word.as_str() {
            "True" => "true".to_string(),
            "False" => "false".to_string(),
            "None" => "null".to_string(),
            _ => word,
        };
        self.out.push_str(&mapped);
        self.last_word = Some(mapped);
        self.finish_value();
    }

    fn finish_value(&mut self) {
        match self.stack.last_mut() {
            Some(Frame::Object(slot)) | Some(Frame::Array(slot)) => *slot = Slot::ValueDone,
            None => {}
        }
    }

    fn set_slot_after_comma(&mut self) {
        match self.stack.last_mut() {
            Some(Frame::Object(slot)) => *slot = Slot::KeyExpected,
            Some(Frame::Array(slot)) => *slot = Slot::ValueExpected,
            None => {}
        }
    }

    fn close(&mut self, closer: char) {
        self.last_word = None;
        let wanted_object = closer == '}';
        let has_opener = self
            .stack
            .iter()
            .any(|frame| matches!(frame, Frame::Object(_)) == wanted_object);
        if !has_opener {
            return;
        }
        while let Some(frame) = self.stack.last().copied() {
            self.seal_top();
            if matches!(frame, Frame::Object(_)) == wanted_object {
                break;
            }
        }
    }

    /// Close the innermost frame, fixing up whatever precedes the closer.
    fn seal_top(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };
        self.trim_trailing_comma();
        match frame {
            Frame::Object(Slot::KeyDone) => self.out.push_str(": null"),
            Frame::Object(Slot::ValueExpected) if self.out.ends_with(':') => {
                self.out.push_str(" null")
            }
            _ => {}
        }
        self.out.push(frame.closer());
        self.finish_value();
    }

    fn trim_trailing_comma(&mut self) {
        self.trim_trailing_whitespace();
        if self.out.ends_with(',') {
            self.out.pop();
            self.trim_trailing_whitespace();
        }
    }

    fn trim_trailing_whitespace(&mut self) {
        let trimmed = self.out.trim_end().len();
        self.out.truncate(trimmed);
    }

    fn finish(mut self) -> String {
        if self.in_string.is_some() {
            if self.escaped {
                self.out.pop();
                self.escaped = false;
            }
            self.drop_partial_unicode_escape();
            self.out.push('"');
            self.close_string();
        } else {
            self.trim_trailing_whitespace();
            self.complete_partial_literal();
        }
        while !self.stack.is_empty() {
            self.seal_top();
        }
        self.out
    }

    fn complete_partial_literal(&mut self) {
        if let Some(word) = self.last_word.take() {
            if self.out.ends_with(&word) {
                for literal in ["true", "false", "null"] {
                    if literal.len() > word.len() && literal.starts_with(&word) {
                        self.out.push_str(&literal[word.len()..]);
                        return;
                    }
                }
            }
        }
        if self.out.ends_with(['-', '+', '.']) {
            self.out.push('0');
        }
    }

    /// Drop a `\uXX` escape cut off before its four hex digits.
    fn drop_partial_unicode_escape(&mut self) {
        let body = &self.out[self.string_start..];
        let Some(pos) = body.rfind("\\u") else {
            return;
        };
        let tail = &body[pos + 2..];
        if tail.len() >= 4 || !tail.chars().all(|c| c.is_ascii_hexdigit()) {
            return;
        }
        let preceding = body[..pos].chars().rev().take_while(|c| *c == '\\').count();
        if preceding % 2 == 0 {
            let cut = self.string_start + pos;
            self.out.truncate(cut);
        }
    }
}

fn is_word_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_word_char(c: char, key_position: bool) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || (key_position && (c == '-' || c == '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assert_valid(input: &str) -> Value {
        let (repaired, modified) = repair(input);
        assert!(modified, "expected {input:?} to need repair");
        serde_json::from_str(&repaired)
            .unwrap_or_else(|e| panic!("repair of {input:?} produced invalid JSON {repaired:?}: {e}"))
    }

    #[test]
    fn well_formed_input_is_untouched() {
        for input in [
            r#"{"a":1}"#,
            r#"{ "a" : [1, 2, {"b": null}] }"#,
            "[]",
            "42",
            r#""just a string""#,
            r#"{"quote": "it's \"fine\""}"#,
        ] {
            assert_eq!(repair(input), (input.to_string(), false));
        }
    }

    #[test]
    fn closes_unbalanced_containers_in_reverse_order() {
        let value = assert_valid(r#"{"a": [1, 2, {"b": "c"#);
        assert_eq!(value, serde_json::json!({"a": [1, 2, {"b": "c"}]}));
    }

    #[test]
    fn closes_unterminated_strings_respecting_escapes() {
        let value = assert_valid(r#"{"path": "src/a\"b"#);
        assert_eq!(value["path"], "src/a\"b");

        let value = assert_valid(r#"{"path": "ends in escape\"#);
        assert_eq!(value["path"], "ends in escape");
    }

    #[test]
    fn normalizes_single_quotes_outside_strings() {
        let value = assert_valid(r#"{'cmd': 'say "hi"', 'n': 'it\'s'}"#);
        assert_eq!(value["cmd"], "say \"hi\"");
        assert_eq!(value["n"], "it's");
    }

    #[test]
    fn quotes_bare_keys() {
        let value = assert_valid(r#"{path: "a.rs", max-lines: 10}"#);
        assert_eq!(value, serde_json::json!({"path": "a.rs", "max-lines": 10}));
    }

    #[test]
    fn strips_trailing_commas() {
        assert_eq!(assert_valid(r#"{"a": 1,}"#), serde_json::json!({"a": 1}));
        assert_eq!(assert_valid("[1, 2, ]"), serde_json::json!([1, 2]));
        assert_eq!(assert_valid(r#"{"a": [1,"#), serde_json::json!({"a": [1]}));
    }

    #[test]
    fn completes_dangling_keys_and_values() {
        assert_eq!(assert_valid(r#"{"a":"#), serde_json::json!({"a": null}));
        assert_eq!(
            assert_valid(r#"{"a": 1, "b"#),
            serde_json::json!({"a": 1, "b": null})
        );
        assert_eq!(assert_valid(r#"{"ok": tr"#), serde_json::json!({"ok": true}));
        assert_eq!(assert_valid(r#"{"n": 1."#), serde_json::json!({"n": 1.0}));
    }

    #[test]
    fn escapes_raw_control_characters_inside_strings() {
        let value = assert_valid("{\"content\": \"line one\nline two\"}");
        assert_eq!(value["content"], "line one\nline two");
    }

    #[test]
    fn drops_truncated_unicode_escape() {
        let value = assert_valid(r#"{"s": "caf\u00"#);
        assert_eq!(value["s"], "caf");
    }

    #[test]
    fn mismatched_closer_closes_inner_frames_first() {
        assert_eq!(
            assert_valid(r#"{"a": [1, 2}"#),
            serde_json::json!({"a": [1, 2]})
        );
    }

    #[test]
    fn python_literals_are_mapped() {
        assert_eq!(
            assert_valid(r#"{"a": True, "b": None"#),
            serde_json::json!({"a": true, "b": null})
        );
    }

    #[test]
    fn truncation_corpus_always_repairs_to_valid_json() {
        let full = r#"{"name": "write_file", "input": {"path": "src/lib.rs", "lines": [1, 2, 3], "force": true, "note": "a \"quoted\" word"}}"#;
        for cut in 1..full.len() {
            if !full.is_char_boundary(cut) {
                continue;
            }
            let fragment = &full[..cut];
            let (repaired, _) = repair(fragment);
            assert!(
                serde_json::from_str::<Value>(&repaired).is_ok(),
                "prefix {fragment:?} repaired to invalid {repaired:?}"
            );
        }
    }

    #[test]
    fn parse_lenient_treats_blank_input_as_empty_object() {
        assert_eq!(parse_lenient("  ").unwrap(), serde_json::json!({}));
    }

    #[test]
    fn parse_lenient_reports_extraction_failure() {
        let err = parse_lenient("not json at all").unwrap_err();
        assert!(matches!(err, LatheError::Extraction { .. }));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn argument_value() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                any::<bool>().prop_map(Value::from),
                (0u32..10_000).prop_map(Value::from),
                "[a-z ]{0,8}".prop_map(Value::from),
            ];
            leaf.prop_recursive(3, 24, 4, |inner| {
                prop_oneof![
                    proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                    proptest::collection::btree_map("[a-z_]{1,6}", inner, 0..4)
                        .prop_map(|map| Value::Object(map.into_iter().collect())),
                ]
            })
        }

        proptest! {
            #[test]
            fn every_prefix_repairs_to_valid_json(
                args in proptest::collection::btree_map("[a-z_]{1,6}", argument_value(), 1..4),
                cut in any::<prop::sample::Index>(),
            ) {
                let full = serde_json::to_string(&Value::Object(args.into_iter().collect())).unwrap();
                let end = cut.index(full.len()).max(1);
                let (repaired, _) = repair(&full[..end]);
                prop_assert!(
                    serde_json::from_str::<Value>(&repaired).is_ok(),
                    "prefix {:?} repaired to invalid {:?}", &full[..end], repaired
                );
            }

            #[test]
            fn repair_is_idempotent(text in "[{}\\[\\]\"':, a-z0-9]{0,24}") {
                let (once, _) = repair(&text);
                if serde_json::from_str::<Value>(&once).is_ok() {
                    prop_assert_eq!(repair(&once), (once.clone(), false));
                }
            }
        }
    }
}
