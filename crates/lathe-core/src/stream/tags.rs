//! Incremental detection of control tags in streamed model text.
//!
//! Models interleave prose with control markers (`<think>`, `<tool_call>`,
//! `<|tool_call_begin|>`, ...) and a marker may be split across network
//! chunks. [`TagDetector`] classifies each pushed chunk into content and tag
//! segments, holding back only a trailing fragment that could still grow
//! into a tag.
//!
//! Matching runs an Aho-Corasick automaton over the bytes of the retained
//! suffix plus the new chunk. Every vocabulary entry starts with `<` and
//! contains no other `<`, so matches never overlap and the first one found
//! is also the leftmost.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Default cap on retained bytes before everything is flushed as content.
pub const DEFAULT_TAG_BUFFER_CAP: usize = 100_000;

/// Longest attribute run accepted inside an `<invoke ...>` tag.
const MAX_INVOKE_ATTRS: usize = 512;

/// Kind of control tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TagKind {
    ToolCallsSectionBegin,
    ToolCallsSectionEnd,
    ToolCallBegin,
    ToolCallEnd,
    ToolCallArgumentBegin,
    ToolSeparator,
    /// `<|tool_call_N|>`.
    NumberedToolCall,
    ToolCallOpen,
    ToolCallClose,
    FunctionCallsOpen,
    FunctionCallsClose,
    /// `<invoke ...>`, attributes included.
    InvokeOpen,
    InvokeClose,
    ThinkBegin,
    ThinkEnd,
    TurnEnd,
}

impl TagKind {
    /// Tags that open an inline tool-call region.
    pub fn opens_tool_call(self) -> bool {
        matches!(
            self,
            Self::ToolCallBegin | Self::NumberedToolCall | Self::ToolCallOpen | Self::InvokeOpen
        )
    }

    /// Tags that close an inline tool-call region.
    pub fn closes_tool_call(self) -> bool {
        matches!(
            self,
            Self::ToolCallEnd | Self::ToolCallClose | Self::InvokeClose
        )
    }
}

/// Vocabulary shipped with the detector.
pub const STANDARD_TAGS: &[(TagKind, &str)] = &[
    (TagKind::ToolCallsSectionBegin, "<|tool_calls_section_begin|>"),
    (TagKind::ToolCallsSectionEnd, "<|tool_calls_section_end|>"),
    (TagKind::ToolCallBegin, "<|tool_call_begin|>"),
    (TagKind::ToolCallEnd, "<|tool_call_end|>"),
    (TagKind::ToolCallArgumentBegin, "<|tool_call_argument_begin|>"),
    (TagKind::ToolSeparator, "<|tool_sep|>"),
    (TagKind::NumberedToolCall, "<|tool_call_"),
    (TagKind::ToolCallOpen, "<tool_call>"),
    (TagKind::ToolCallClose, "</tool_call>"),
    (TagKind::FunctionCallsOpen, "<function_calls>"),
    (TagKind::FunctionCallsClose, "</function_calls>"),
    (TagKind::InvokeOpen, "<invoke"),
    (TagKind::InvokeClose, "</invoke>"),
    (TagKind::ThinkBegin, "<think>"),
    (TagKind::ThinkEnd, "</think>"),
    (TagKind::TurnEnd, "<|im_end|>"),
    (TagKind::TurnEnd, "<|eot_id|>"),
    (TagKind::TurnEnd, "<|end|>"),
];

/// A recognized tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMatch {
    pub kind: TagKind,
    /// Exact text of the tag as it appeared in the stream.
    pub raw: String,
    /// Ordinal of a numbered tool-call marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// `name` attribute of an `<invoke>` tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One classified piece of the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Segment {
    Content(String),
    Tag(TagMatch),
}

#[derive(Debug, Default)]
struct Node {
    next: BTreeMap<u8, usize>,
    fail: usize,
    /// Pattern recognized at this node, directly or through failure links.
    output: Option<usize>,
    depth: usize,
}

#[derive(Debug)]
struct Automaton {
    nodes: Vec<Node>,
    patterns: Vec<(TagKind, String)>,
}

impl Automaton {
    fn build(patterns: &[(TagKind, &str)]) -> Self {
        let mut nodes = vec![Node::default()];
        for (index, (_, text)) in patterns.iter().enumerate() {
            let mut state = 0;
            for &byte in text.as_bytes() {
                state = match nodes[state].next.get(&byte) {
                    Some(&next) => next,
                    None => {
                        let depth = nodes[state].depth + 1;
                        nodes.push(Node {
                            depth,
                            ..Node::default()
                        });
                        let id = nodes.len() - 1;
                        nodes[state].next.insert(byte, id);
                        id
                    }
                };
            }
            if nodes[state].output.is_none() {
                nodes[state].output = Some(index);
            }
        }

        let mut queue: VecDeque<usize> = nodes[0].next.values().copied().collect();
        while let Some(state) = queue.pop_front() {
            let edges: Vec<(u8, usize)> = nodes[state].next.iter().map(|(b, n)| (*b, *n)).collect();
            for (byte, child) in edges {
                let mut fallback = nodes[state].fail;
                let fail = loop {
                    if let Some(&next) = nodes[fallback].next.get(&byte) {
                        if next != child {
                            break next;
                        }
                    }
                    if fallback == 0 {
                        break 0;
                    }
                    fallback = nodes[fallback].fail;
                };
                nodes[child].fail = fail;
                if nodes[child].output.is_none() {
                    nodes[child].output = nodes[fail].output;
                }
                queue.push_back(child);
            }
        }

        Self {
            nodes,
            patterns: patterns
                .iter()
                .map(|(kind, text)| (*kind, (*text).to_string()))
                .collect(),
        }
    }

    fn step(&self, mut state: usize, byte: u8) -> usize {
        loop {
            if let Some(&next) = self.nodes[state].next.get(&byte) {
                return next;
            }
            if state == 0 {
                return 0;
            }
            state = self.nodes[state].fail;
        }
    }
}

/// Compiled tag vocabulary. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    automaton: Arc<Automaton>,
}

impl Vocabulary {
    pub fn new(patterns: &[(TagKind, &str)]) -> Self {
        Self {
            automaton: Arc::new(Automaton::build(patterns)),
        }
    }

    pub fn standard() -> Self {
        Self::new(STANDARD_TAGS)
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::standard()
    }
}

enum Lookahead {
    Tag { end: usize, index: Option<u32> },
    NotATag,
    Incomplete,
}

/// Streaming tag classifier.
#[derive(Debug, Clone)]
pub struct TagDetector {
    vocabulary: Vocabulary,
    pending: String,
    cap: usize,
    overflows: u64,
}

impl Default for TagDetector {
    fn default() -> Self {
        Self::new(Vocabulary::standard(), DEFAULT_TAG_BUFFER_CAP)
    }
}

impl TagDetector {
    pub fn new(vocabulary: Vocabulary, cap: usize) -> Self {
        Self {
            vocabulary,
            pending: String::new(),
            cap: cap.max(1),
            overflows: 0,
        }
    }

    /// Classify `chunk`, returning every segment that is now certain.
    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.push_str(chunk);
        let mut segments = Vec::new();
        let automaton = &*self.vocabulary.automaton;
        let bytes = buf.as_bytes();

        let mut state = 0;
        let mut emit_from = 0;
        let mut i = 0;
        let mut held_from = None;
        while i < bytes.len() {
            state = automaton.step(state, bytes[i]);
            i += 1;
            let Some(pattern) = automaton.nodes[state].output else {
                continue;
            };
            let (kind, text) = &automaton.patterns[pattern];
            let start = i - text.len();
            let (end, index) = match lookahead(*kind, bytes, i) {
                Lookahead::Tag { end, index } => (end, index),
                Lookahead::NotATag => continue,
                Lookahead::Incomplete => {
                    held_from = Some(start);
                    break;
                }
            };
            if start > emit_from {
                segments.push(Segment::Content(buf[emit_from..start].to_string()));
            }
            let raw = buf[start..end].to_string();
            let name = (*kind == TagKind::InvokeOpen)
                .then(|| invoke_name(&raw))
                .flatten();
            segments.push(Segment::Tag(TagMatch {
                kind: *kind,
                raw,
                index,
                name,
            }));
            emit_from = end;
            i = end;
            state = 0;
        }

        let hold = held_from.unwrap_or(bytes.len() - automaton.nodes[state].depth);
        if hold > emit_from {
            segments.push(Segment::Content(buf[emit_from..hold].to_string()));
        }
        self.pending = buf[hold.max(emit_from)..].to_string();

        if self.pending.len() > self.cap {
            self.overflows += 1;
            tracing::warn!(
                retained = self.pending.len(),
                cap = self.cap,
                "tag detector buffer overflow, flushing as content"
            );
            segments.push(Segment::Content(std::mem::take(&mut self.pending)));
        }
        segments
    }

    /// Text held back because it may still become a tag.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// End of stream: release the retained suffix as content.
    pub fn finish(&mut self) -> Vec<Segment> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        vec![Segment::Content(std::mem::take(&mut self.pending))]
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Number of times the retained buffer exceeded its cap.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }
}

/// Decide how an open-ended pattern that just matched at `bytes[..at]` ends.
fn lookahead(kind: TagKind, bytes: &[u8], at: usize) -> Lookahead {
    match kind {
        TagKind::NumberedToolCall => {
            let digits = bytes[at..].iter().take_while(|b| b.is_ascii_digit()).count();
            let after = at + digits;
            if after == bytes.len() {
                return Lookahead::Incomplete;
            }
            if digits == 0 {
                return Lookahead::NotATag;
            }
            let rest = &bytes[after..];
            if rest.starts_with(b"|>") {
                let index = std::str::from_utf8(&bytes[at..after])
                    .ok()
                    .and_then(|d| d.parse().ok());
                return Lookahead::Tag {
                    end: after + 2,
                    index,
                };
            }
            if b"|>".starts_with(rest) {
                return Lookahead::Incomplete;
            }
            Lookahead::NotATag
        }
        TagKind::InvokeOpen => {
            let Some(&next) = bytes.get(at) else {
                return Lookahead::Incomplete;
            };
            if next == b'>' {
                return Lookahead::Tag {
                    end: at + 1,
                    index: None,
                };
            }
            if !next.is_ascii_whitespace() {
                return Lookahead::NotATag;
            }
            let window = &bytes[at..bytes.len().min(at + MAX_INVOKE_ATTRS)];
            match window.iter().position(|b| *b == b'>') {
                Some(pos) => Lookahead::Tag {
                    end: at + pos + 1,
                    index: None,
                },
                None if at + MAX_INVOKE_ATTRS >= bytes.len() => Lookahead::Incomplete,
                None => Lookahead::NotATag,
            }
        }
        _ => Lookahead::Tag {
            end: at,
            index: None,
        },
    }
}

static INVOKE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"name\s*=\s*["']([^"']*)["']"#).expect("invoke name regex must compile")
});

fn invoke_name(raw: &str) -> Option<String> {
    INVOKE_NAME_RE.captures(raw).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn merge(segments: Vec<Segment>) -> Vec<Segment> {
        let mut out: Vec<Segment> = Vec::new();
        for segment in segments {
            match (out.last_mut(), segment) {
                (Some(Segment::Content(prev)), Segment::Content(next)) => prev.push_str(&next),
                (_, segment) => out.push(segment),
            }
        }
        out
    }

    fn run(chunks: &[&str]) -> Vec<Segment> {
        let mut detector = TagDetector::default();
        let mut segments = Vec::new();
        for chunk in chunks {
            segments.extend(detector.push(chunk));
        }
        segments.extend(detector.finish());
        merge(segments)
    }

    fn kinds(segments: &[Segment]) -> Vec<Option<TagKind>> {
        segments
            .iter()
            .map(|s| match s {
                Segment::Content(_) => None,
                Segment::Tag(tag) => Some(tag.kind),
            })
            .collect()
    }

    #[test]
    fn splits_content_around_tags() {
        let segments = run(&["before <think>pondering</think> after"]);
        assert_eq!(
            kinds(&segments),
            vec![
                None,
                Some(TagKind::ThinkBegin),
                None,
                Some(TagKind::ThinkEnd),
                None
            ]
        );
        assert_eq!(segments[2], Segment::Content("pondering".to_string()));
    }

    #[test]
    fn holds_back_a_partial_tag_across_chunks() {
        let mut detector = TagDetector::default();
        let first = detector.push("hello <too");
        assert_eq!(first, vec![Segment::Content("hello ".to_string())]);
        assert_eq!(detector.pending(), "<too");

        let second = detector.push("l_call>{}");
        assert_eq!(kinds(&second), vec![Some(TagKind::ToolCallOpen), None]);
        assert_eq!(detector.pending(), "");
    }

    #[test]
    fn lone_angle_bracket_is_released_once_it_cannot_match() {
        let mut detector = TagDetector::default();
        assert_eq!(detector.push("a <"), vec![Segment::Content("a ".to_string())]);
        assert_eq!(detector.push(" b"), vec![Segment::Content("< b".to_string())]);
    }

    #[test]
    fn numbered_markers_carry_their_index() {
        let segments = run(&["<|tool_call_1", "2|>payload"]);
        match &segments[0] {
            Segment::Tag(tag) => {
                assert_eq!(tag.kind, TagKind::NumberedToolCall);
                assert_eq!(tag.index, Some(12));
                assert_eq!(tag.raw, "<|tool_call_12|>");
            }
            other => panic!("expected tag, got {other:?}"),
        }
    }

    #[test]
    fn numbered_prefix_does_not_shadow_named_markers() {
        let segments = run(&["<|tool_call_begin|>x<|tool_call_end|>"]);
        assert_eq!(
            kinds(&segments),
            vec![Some(TagKind::ToolCallBegin), None, Some(TagKind::ToolCallEnd)]
        );
    }

    #[test]
    fn invoke_tags_capture_attributes() {
        let segments = run(&[r#"<invoke name="read_file">"#, "</invoke>"]);
        match &segments[0] {
            Segment::Tag(tag) => {
                assert_eq!(tag.kind, TagKind::InvokeOpen);
                assert_eq!(tag.name.as_deref(), Some("read_file"));
            }
            other => panic!("expected tag, got {other:?}"),
        }
        assert_eq!(kinds(&segments)[1], Some(TagKind::InvokeClose));
    }

    #[test]
    fn invoker_is_plain_text() {
        assert_eq!(
            run(&["the <invoker> pattern"]),
            vec![Segment::Content("the <invoker> pattern".to_string())]
        );
    }

    #[test]
    fn finish_flushes_incomplete_suffix_as_content() {
        let mut detector = TagDetector::default();
        assert!(detector.push("<thi").is_empty());
        assert_eq!(detector.finish(), vec![Segment::Content("<thi".to_string())]);
        assert_eq!(detector.pending(), "");
    }

    #[test]
    fn overflow_flushes_retained_buffer() {
        let mut detector = TagDetector::new(Vocabulary::standard(), 16);
        let segments = detector.push("<invoke name=\"a very long attribute");
        assert_eq!(detector.overflows(), 1);
        assert_eq!(
            merge(segments),
            vec![Segment::Content("<invoke name=\"a very long attribute".to_string())]
        );
    }

    #[test]
    fn reset_discards_retained_text() {
        let mut detector = TagDetector::default();
        detector.push("<|im_");
        detector.reset();
        assert!(detector.finish().is_empty());
    }

    #[test]
    fn multibyte_content_survives_splitting() {
        assert_eq!(
            run(&["héllo ", "wörld <|im_end|>"]),
            vec![
                Segment::Content("héllo wörld ".to_string()),
                Segment::Tag(TagMatch {
                    kind: TagKind::TurnEnd,
                    raw: "<|im_end|>".to_string(),
                    index: None,
                    name: None,
                }),
            ]
        );
    }

    const SAMPLE: &str = "intro <think>plan é</think> text <tool_call>{\"name\":\"a\"}</tool_call> \
        <|tool_calls_section_begin|><|tool_call_begin|>functions.b:0<|tool_call_argument_begin|>{}\
        <|tool_call_end|><|tool_calls_section_end|> <|tool_call_7|> <invoke name=\"c\"></invoke> < <| done<|eot_id|>";

    proptest! {
        #[test]
        fn chunking_never_changes_the_result(cuts in proptest::collection::vec(0usize..SAMPLE.len(), 0..12)) {
            let mut points: Vec<usize> = cuts
                .into_iter()
                .filter(|c| SAMPLE.is_char_boundary(*c))
                .collect();
            points.sort_unstable();
            points.dedup();
            let mut chunks = Vec::new();
            let mut last = 0;
            for point in points {
                chunks.push(&SAMPLE[last..point]);
                last = point;
            }
            chunks.push(&SAMPLE[last..]);

            prop_assert_eq!(run(&chunks), run(&[SAMPLE]));
        }

        #[test]
        fn no_input_is_lost(text in "[a-z<>|_/ ]{0,64}", split in 0usize..64) {
            let split = split.min(text.len());
            let segments = run(&[&text[..split], &text[split..]]);
            let rebuilt: String = segments
                .iter()
                .map(|s| match s {
                    Segment::Content(c) => c.as_str(),
                    Segment::Tag(t) => t.raw.as_str(),
                })
                .collect();
            prop_assert_eq!(rebuilt, text);
        }
    }
}
