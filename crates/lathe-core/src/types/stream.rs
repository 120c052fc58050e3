//! Normalized provider stream events.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::usage::Usage;

/// Why generation finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}

/// One event of a provider stream, after provider-specific decoding.
///
/// Transports translate their wire format (SSE frames, websocket messages)
/// into this shape; the run loop never sees anything provider specific.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// Incremental assistant text. May contain vendor control tags.
    ContentDelta { text: String },
    /// Incremental reasoning text.
    ReasoningDelta { text: String },
    /// A piece of a natively streamed tool call.
    ToolCallDelta {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        arguments_delta: String,
    },
    Usage { usage: Usage },
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<FinishReason>,
    },
    /// In-band error reported by the provider.
    Error { message: String },
}

impl TransportEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::ContentDelta { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::ReasoningDelta { text: text.into() }
    }

    pub fn tool_delta(
        id: impl Into<String>,
        name: Option<&str>,
        arguments_delta: impl Into<String>,
    ) -> Self {
        Self::ToolCallDelta {
            id: id.into(),
            name: name.map(str::to_string),
            arguments_delta: arguments_delta.into(),
        }
    }

    pub fn completed(finish_reason: FinishReason) -> Self {
        Self::Completed {
            finish_reason: Some(finish_reason),
        }
    }
}
