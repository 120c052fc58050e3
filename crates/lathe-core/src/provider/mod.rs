//! Model transport trait, failover pool and a scripted transport.

pub mod failover;
pub mod scripted;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::Result;
use crate::stream::TagSplitter;
use crate::tools::{ExtractionFailure, ToolCallAssembler, ToolDefinition};
use crate::types::{FinishReason, ModelMessage, ToolCall, TransportEvent, Usage};

pub use failover::ProviderPool;
pub use scripted::{ScriptStep, ScriptedTransport, ScriptedTurn};

/// A request sent to a model transport.
#[derive(Debug, Clone, Default)]
pub struct TransportRequest {
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDefinition>,
    /// Optional session id for provider-side caching and affinity.
    pub session_id: Option<String>,
}

/// A complete, non-streamed model response.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCall>,
    /// Tool calls whose arguments could not be recovered.
    pub malformed: Vec<ExtractionFailure>,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
}

/// Core trait implemented by every model backend.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Provider name used in logs and failover events.
    fn provider_name(&self) -> &str;

    /// Generate a complete response.
    ///
    /// The default drains [`ModelTransport::stream_message`].
    async fn send_message(&self, request: &TransportRequest) -> Result<TransportResponse> {
        let stream = self.stream_message(request).await?;
        collect_response(stream).await
    }

    /// Generate a streamed response.
    async fn stream_message(
        &self,
        request: &TransportRequest,
    ) -> Result<BoxStream<'static, Result<TransportEvent>>>;
}

/// Drain a transport stream into a [`TransportResponse`].
///
/// Inline tool-call markup is split out of the text and assembled along
/// with native tool-call deltas.
pub async fn collect_response(
    stream: BoxStream<'static, Result<TransportEvent>>,
) -> Result<TransportResponse> {
    let mut events = TagSplitter::default().transform(stream);
    let mut assembler = ToolCallAssembler::default();
    let mut response = TransportResponse::default();

    while let Some(event) = events.next().await {
        match event? {
            TransportEvent::ContentDelta { text } => response.text.push_str(&text),
            TransportEvent::ReasoningDelta { text } => response.reasoning.push_str(&text),
            TransportEvent::ToolCallDelta {
                id,
                name,
                arguments_delta,
            } => {
                assembler.push(&id, name.as_deref(), &arguments_delta);
            }
            TransportEvent::Usage { usage } => response.usage.merge(&usage),
            TransportEvent::Completed { finish_reason } => {
                response.finish_reason = finish_reason;
            }
            TransportEvent::Error { message } => {
                return Err(crate::error::LatheError::Stream(message));
            }
        }
    }

    for result in assembler.finalize() {
        match result {
            Ok(call) => response.tool_calls.push(call),
            Err(failure) => response.malformed.push(failure),
        }
    }
    Ok(response)
}
