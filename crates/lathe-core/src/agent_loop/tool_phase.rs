use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::control::transition;
use super::objectives::{self, UPDATE_OBJECTIVES};
use super::types::RunPhase;
use crate::error::{LatheError, Result};
use crate::locks::{LockLease, LockMode, OwnerToken, ResourceLockManager};
use crate::telemetry::{StreamEvent, TelemetryPipeline};
use crate::tools::{Tool, ToolAccess, ToolArguments, ToolContext, ToolHost, ToolRegistry};
use crate::types::{RunState, ToolCall, ToolResult};

pub(super) struct ToolPhaseArgs<'a> {
    pub(super) tools: &'a ToolRegistry,
    pub(super) host: &'a Arc<dyn ToolHost>,
    pub(super) locks: &'a ResourceLockManager,
    pub(super) pipeline: &'a TelemetryPipeline,
    pub(super) cancel: &'a CancellationToken,
}

/// Execute one turn's calls concurrently. Results come back in call order.
///
/// Tool failures, lock timeouts and unknown tools become error results; only
/// cancellation fails the phase.
pub(super) async fn run_tool_phase(
    args: ToolPhaseArgs<'_>,
    state: &mut RunState,
    calls: &[ToolCall],
) -> Result<Vec<ToolResult>> {
    let ToolPhaseArgs {
        tools,
        host,
        locks,
        pipeline,
        cancel,
    } = args;
    let mut results: Vec<Option<ToolResult>> = vec![None; calls.len()];
    let mut pending = FuturesUnordered::new();

    transition(state, RunPhase::AwaitingLock);
    for (index, call) in calls.iter().enumerate() {
        if call.name == UPDATE_OBJECTIVES {
            let started = Instant::now();
            emit_started(pipeline, call);
            let result = match objectives::apply(state, &call.input) {
                Ok(value) => ToolResult::ok(&call.id, value),
                Err(err) => ToolResult::error(&call.id, err.to_string()),
            };
            record(state, pipeline, call, &result, started);
            results[index] = Some(result);
            continue;
        }

        let tool = match tools.get(&call.name) {
            Some(tool) => Arc::clone(tool),
            None => {
                let result = ToolResult::error(&call.id, format!("unknown tool: {}", call.name));
                record(state, pipeline, call, &result, Instant::now());
                results[index] = Some(result);
                continue;
            }
        };
        if let Err(message) = tool.parameters().validate(&call.input) {
            let result = ToolResult::error(
                &call.id,
                format!("invalid arguments for {}: {message}", call.name),
            );
            record(state, pipeline, call, &result, Instant::now());
            results[index] = Some(result);
            continue;
        }

        emit_started(pipeline, call);
        let call = call.clone();
        let host = Arc::clone(host);
        let locks = locks.clone();
        let pipeline = pipeline.clone();
        let cancel = cancel.child_token();
        pending.push(async move {
            let started = Instant::now();
            let outcome = execute_call(tool, &call, host, &locks, &pipeline, cancel).await;
            (index, call, outcome, started)
        });
    }

    if pending.is_empty() {
        return Ok(results.into_iter().flatten().collect());
    }

    state.active_tool = Some(
        calls
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    );
    state.active_file = calls
        .iter()
        .find_map(|c| c.input.get("path").and_then(|p| p.as_str()))
        .map(str::to_string);
    transition(state, RunPhase::Executing);
    pipeline.progress(state);

    while !pending.is_empty() {
        let progress_due = pipeline.progress_deadline();
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LatheError::Cancelled),
            _ = tokio::time::sleep_until(progress_due.unwrap_or_else(Instant::now)),
                if progress_due.is_some() => {
                pipeline.flush_due_progress();
                continue;
            }
            next = pending.next() => next,
        };
        let Some((index, call, outcome, started)) = next else {
            break;
        };
        let result = match outcome {
            Ok(value) => ToolResult::ok(&call.id, value),
            Err(err) => {
                tracing::debug!(call_id = %call.id, tool = %call.name, error = %err, "tool call failed");
                ToolResult::error(&call.id, err.to_string())
            }
        };
        record(state, pipeline, &call, &result, started);
        results[index] = Some(result);
    }

    state.active_tool = None;
    state.active_file = None;
    Ok(results.into_iter().flatten().collect())
}

async fn execute_call(
    tool: Arc<dyn Tool>,
    call: &ToolCall,
    host: Arc<dyn ToolHost>,
    locks: &ResourceLockManager,
    pipeline: &TelemetryPipeline,
    cancel: CancellationToken,
) -> Result<serde_json::Value> {
    let args = ToolArguments::new(call.input.clone());
    let owner = OwnerToken::new();
    let _lease = match tool.access(&args, host.as_ref())? {
        ToolAccess::Unscoped => None,
        ToolAccess::Resource { key, mode } => {
            Some(acquire_with_notice(locks, &key, mode, owner, pipeline, &cancel).await?)
        }
    };
    let ctx = ToolContext {
        call_id: call.id.clone(),
        host,
        owner,
        cancel,
    };
    tool.execute(&args, &ctx).await
}

/// Acquire a lock, reporting `LockWaiting` once if it takes longer than the
/// watchdog interval.
async fn acquire_with_notice(
    locks: &ResourceLockManager,
    key: &str,
    mode: LockMode,
    owner: OwnerToken,
    pipeline: &TelemetryPipeline,
    cancel: &CancellationToken,
) -> Result<LockLease> {
    let watchdog = locks.config().watchdog();
    let acquire = locks.acquire(key, mode, Some(owner), None, cancel);
    tokio::pin!(acquire);
    tokio::select! {
        lease = &mut acquire => return lease,
        _ = tokio::time::sleep(watchdog) => {}
    }
    let snapshot = locks.snapshot(key);
    pipeline.emit(StreamEvent::LockWaiting {
        key: key.to_string(),
        mode,
        waited_ms: watchdog.as_millis() as u64,
        readers: snapshot.readers,
        writer_depth: snapshot.writer_depth,
    });
    acquire.await
}

fn emit_started(pipeline: &TelemetryPipeline, call: &ToolCall) {
    pipeline.emit(StreamEvent::ToolStarted {
        call_id: call.id.clone(),
        name: call.name.clone(),
        input: call.input.clone(),
    });
}

fn record(
    state: &mut RunState,
    pipeline: &TelemetryPipeline,
    call: &ToolCall,
    result: &ToolResult,
    started: Instant,
) {
    state.tool_count += 1;
    pipeline.emit(StreamEvent::Tool {
        call_id: call.id.clone(),
        name: call.name.clone(),
        result: result.result.clone(),
        is_error: result.is_error,
        duration_ms: started.elapsed().as_millis() as u64,
    });
    pipeline.progress(state);
}
