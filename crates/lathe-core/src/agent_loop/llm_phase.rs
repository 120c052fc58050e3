use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::limits::RunnerLimits;
use crate::error::{LatheError, Result};
use crate::json::ParseCache;
use crate::provider::{ModelTransport, ProviderPool, TransportRequest};
use crate::stream::TagSplitter;
use crate::telemetry::{StreamEvent, TelemetryPipeline};
use crate::tools::{ExtractionFailure, ToolCallAssembler};
use crate::types::{FinishReason, ToolCall, TransportEvent, Usage};
use crate::util::{next_within, RetryPolicy};

/// What the model produced in one turn.
#[derive(Debug, Default)]
pub(super) struct AssistantTurn {
    pub(super) text: String,
    pub(super) calls: Vec<ToolCall>,
    pub(super) malformed: Vec<ExtractionFailure>,
    pub(super) usage: Usage,
    pub(super) finish_reason: Option<FinishReason>,
}

pub(super) struct LlmPhaseArgs<'a> {
    pub(super) pool: &'a mut ProviderPool,
    pub(super) retry: &'a RetryPolicy,
    pub(super) request: &'a TransportRequest,
    pub(super) pipeline: &'a TelemetryPipeline,
    pub(super) cache: &'a ParseCache,
    pub(super) limits: RunnerLimits,
    pub(super) cancel: &'a CancellationToken,
}

/// Stream one model turn: retry transient failures, then fail over to the
/// next provider for the rest of the turn.
pub(super) async fn run_llm_phase(args: LlmPhaseArgs<'_>) -> Result<AssistantTurn> {
    let LlmPhaseArgs {
        pool,
        retry,
        request,
        pipeline,
        cache,
        limits,
        cancel,
    } = args;
    let attempts = AtomicU32::new(0);
    let streamed = AtomicU32::new(0);

    loop {
        let provider = Arc::clone(pool.current());
        let provider_name = provider.provider_name().to_string();
        let transport: &dyn ModelTransport = provider.as_ref();
        let attempts_ref = &attempts;
        let streamed_ref = &streamed;

        let result = retry
            .execute(
                cancel,
                |retry, err| {
                    discard_partial(pipeline, &provider_name, &streamed);
                    pipeline.emit(StreamEvent::RetryScheduled {
                        provider: provider_name.clone(),
                        attempt: retry.attempt,
                        delay_ms: retry.delay.as_millis() as u64,
                        class: retry.class,
                        message: err.to_string(),
                    });
                },
                move |_| {
                    attempts_ref.fetch_add(1, Ordering::Relaxed);
                    stream_turn(transport, request, pipeline, cache, limits, cancel, streamed_ref)
                },
            )
            .await;

        let err = match result {
            Ok(turn) => return Ok(turn),
            Err(err) if err.is_retryable() => err,
            Err(err) => return Err(err),
        };
        match pool.advance() {
            Some(next) => {
                discard_partial(pipeline, &provider_name, &streamed);
                pipeline.emit(StreamEvent::ProviderFailover {
                    from: provider_name,
                    to: next.provider_name().to_string(),
                    reason: err.to_string(),
                });
            }
            None => {
                return Err(LatheError::ProvidersExhausted {
                    attempts: attempts.load(Ordering::Relaxed),
                    message: err.to_string(),
                })
            }
        }
    }
}

/// Tell consumers to drop deltas from an attempt that is about to be
/// retried or failed over.
fn discard_partial(pipeline: &TelemetryPipeline, provider: &str, streamed: &AtomicU32) {
    let discarded_deltas = streamed.swap(0, Ordering::Relaxed);
    if discarded_deltas > 0 {
        pipeline.emit(StreamEvent::StreamReset {
            provider: provider.to_string(),
            discarded_deltas,
        });
    }
}

/// `streamed` counts the deltas emitted by this attempt.
async fn stream_turn(
    provider: &dyn ModelTransport,
    request: &TransportRequest,
    pipeline: &TelemetryPipeline,
    cache: &ParseCache,
    limits: RunnerLimits,
    cancel: &CancellationToken,
    streamed: &AtomicU32,
) -> Result<AssistantTurn> {
    let stream = tokio::select! {
        _ = cancel.cancelled() => return Err(LatheError::Cancelled),
        stream = provider.stream_message(request) => stream?,
    };
    let mut events = TagSplitter::with_cap(limits.tag_buffer_cap).transform(stream);
    let mut assembler = ToolCallAssembler::with_cache(cache.clone());
    let mut turn = AssistantTurn::default();

    loop {
        let progress_due = pipeline.progress_deadline();
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LatheError::Cancelled),
            _ = tokio::time::sleep_until(progress_due.unwrap_or_else(tokio::time::Instant::now)),
                if progress_due.is_some() => {
                pipeline.flush_due_progress();
                continue;
            }
            next = next_within(&mut events, limits.stream_idle_timeout) => next?,
        };
        let Some(event) = next else { break };

        match event {
            TransportEvent::ContentDelta { text } => {
                turn.text.push_str(&text);
                streamed.fetch_add(1, Ordering::Relaxed);
                pipeline.emit(StreamEvent::ContentDelta { text });
            }
            TransportEvent::ReasoningDelta { text } => {
                streamed.fetch_add(1, Ordering::Relaxed);
                pipeline.emit(StreamEvent::ReasoningDelta { text });
            }
            TransportEvent::ToolCallDelta {
                id,
                name,
                arguments_delta,
            } => {
                let fragment = assembler.push(&id, name.as_deref(), &arguments_delta);
                let call_id = fragment.id.clone();
                let name = (!fragment.name.is_empty()).then(|| fragment.name.clone());
                streamed.fetch_add(1, Ordering::Relaxed);
                pipeline.emit(StreamEvent::ToolDelta {
                    call_id,
                    name,
                    arguments_delta,
                });
            }
            TransportEvent::Usage { usage } => turn.usage.merge(&usage),
            TransportEvent::Completed { finish_reason } => turn.finish_reason = finish_reason,
            TransportEvent::Error { message } => {
                return Err(LatheError::transport(provider.provider_name(), message));
            }
        }
    }

    for result in assembler.finalize() {
        match result {
            Ok(call) => turn.calls.push(call),
            Err(failure) => {
                tracing::debug!(call_id = %failure.id, error = %failure.message, "malformed tool call");
                turn.malformed.push(failure);
            }
        }
    }
    Ok(turn)
}
