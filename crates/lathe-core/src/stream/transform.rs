//! Route tagged model text into content, reasoning and tool-call events.

use futures::stream::BoxStream;
use futures::StreamExt;

use super::tags::{Segment, TagDetector, TagKind, TagMatch, Vocabulary};
use crate::error::LatheError;
use crate::types::{ToolCall, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Region {
    Text,
    Think,
    /// Inside an inline tool call; raw text collected for extraction.
    ToolCall { id: String, raw: String },
}

/// Splits `ContentDelta` text on control tags.
///
/// Text outside tags stays content, `<think>` regions become reasoning,
/// and each inline tool-call region becomes a single nameless
/// `ToolCallDelta` carrying the raw region text. Other events pass through.
#[derive(Debug, Clone)]
pub struct TagSplitter {
    detector: TagDetector,
    region: Region,
    in_section: bool,
}

impl Default for TagSplitter {
    fn default() -> Self {
        Self::new(TagDetector::default())
    }
}

impl TagSplitter {
    pub fn new(detector: TagDetector) -> Self {
        Self {
            detector,
            region: Region::Text,
            in_section: false,
        }
    }

    pub fn with_cap(cap: usize) -> Self {
        Self::new(TagDetector::new(Vocabulary::standard(), cap))
    }

    /// Translate one transport event.
    pub fn push(&mut self, event: TransportEvent) -> Vec<TransportEvent> {
        match event {
            TransportEvent::ContentDelta { text } => {
                let segments = self.detector.push(&text);
                let mut out = Vec::new();
                for segment in segments {
                    self.route(segment, &mut out);
                }
                out
            }
            TransportEvent::Completed { .. } | TransportEvent::Error { .. } => {
                let mut out = self.finish();
                out.push(event);
                out
            }
            other => vec![other],
        }
    }

    /// Flush retained text and close any open region.
    pub fn finish(&mut self) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        for segment in self.detector.finish() {
            self.route(segment, &mut out);
        }
        self.close_tool_region(&mut out);
        self.region = Region::Text;
        self.in_section = false;
        out
    }

    pub fn reset(&mut self) {
        self.detector.reset();
        self.region = Region::Text;
        self.in_section = false;
    }

    /// Whether the splitter is inside `<think>`.
    pub fn in_reasoning(&self) -> bool {
        self.region == Region::Think
    }

    fn route(&mut self, segment: Segment, out: &mut Vec<TransportEvent>) {
        match segment {
            Segment::Content(text) => match &mut self.region {
                Region::Text if self.in_section && text.trim().is_empty() => {}
                Region::Text => push_merged(out, TransportEvent::content(text)),
                Region::Think => push_merged(out, TransportEvent::reasoning(text)),
                Region::ToolCall { raw, .. } => raw.push_str(&text),
            },
            Segment::Tag(tag) => self.on_tag(tag, out),
        }
    }

    fn on_tag(&mut self, tag: TagMatch, out: &mut Vec<TransportEvent>) {
        let in_tool = matches!(self.region, Region::ToolCall { .. });
        match tag.kind {
            TagKind::ThinkBegin if !in_tool => self.region = Region::Think,
            TagKind::ThinkEnd if self.region == Region::Think => self.region = Region::Text,
            kind if kind.opens_tool_call() => {
                self.close_tool_region(out);
                let raw = if kind == TagKind::InvokeOpen {
                    tag.raw
                } else {
                    String::new()
                };
                self.region = Region::ToolCall {
                    id: ToolCall::generated_id(),
                    raw,
                };
            }
            kind if kind.closes_tool_call() && in_tool => {
                if let (TagKind::InvokeClose, Region::ToolCall { raw, .. }) =
                    (kind, &mut self.region)
                {
                    raw.push_str(&tag.raw);
                }
                self.close_tool_region(out);
            }
            TagKind::ToolCallArgumentBegin | TagKind::ToolSeparator if in_tool => {
                if let Region::ToolCall { raw, .. } = &mut self.region {
                    raw.push_str(&tag.raw);
                }
            }
            TagKind::ToolCallsSectionBegin | TagKind::FunctionCallsOpen => self.in_section = true,
            TagKind::ToolCallsSectionEnd | TagKind::FunctionCallsClose => {
                self.close_tool_region(out);
                self.in_section = false;
            }
            TagKind::TurnEnd => {}
            _ => match &mut self.region {
                // Stray markers inside a region are kept for the extractor.
                Region::ToolCall { raw, .. } => raw.push_str(&tag.raw),
                Region::Think => push_merged(out, TransportEvent::reasoning(tag.raw)),
                Region::Text => push_merged(out, TransportEvent::content(tag.raw)),
            },
        }
    }

    fn close_tool_region(&mut self, out: &mut Vec<TransportEvent>) {
        if let Region::ToolCall { id, raw } = std::mem::replace(&mut self.region, Region::Text) {
            if raw.trim().is_empty() {
                return;
            }
            out.push(TransportEvent::tool_delta(id, None, raw));
        }
    }

    /// Apply the splitter to a whole transport stream.
    pub fn transform(
        mut self,
        stream: BoxStream<'static, Result<TransportEvent, LatheError>>,
    ) -> BoxStream<'static, Result<TransportEvent, LatheError>> {
        let transformed = async_stream::stream! {
            let mut inner = std::pin::pin!(stream);
            while let Some(item) = inner.next().await {
                match item {
                    Ok(event) => {
                        for out in self.push(event) {
                            yield Ok(out);
                        }
                    }
                    Err(e) => {
                        for out in self.finish() {
                            yield Ok(out);
                        }
                        yield Err(e);
                        return;
                    }
                }
            }
            for out in self.finish() {
                yield Ok(out);
            }
        };
        Box::pin(transformed)
    }
}

/// Append, merging with a trailing event of the same text kind.
fn push_merged(out: &mut Vec<TransportEvent>, event: TransportEvent) {
    match (out.last_mut(), event) {
        (
            Some(TransportEvent::ContentDelta { text: prev }),
            TransportEvent::ContentDelta { text },
        )
        | (
            Some(TransportEvent::ReasoningDelta { text: prev }),
            TransportEvent::ReasoningDelta { text },
        ) => prev.push_str(&text),
        (_, event) => out.push(event),
    }
}
