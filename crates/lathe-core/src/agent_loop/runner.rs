//! The run loop.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::control::{finish_run, transition, RunEnd};
use super::history::Conversation;
use super::limits::RunnerLimits;
use super::llm_phase::{run_llm_phase, LlmPhaseArgs};
use super::objectives::{self, UPDATE_OBJECTIVES};
use super::tool_phase::{run_tool_phase, ToolPhaseArgs};
use super::types::{RunPhase, RunRequest, RunResult};
use crate::config::RuntimeConfig;
use crate::error::{LatheError, Result};
use crate::json::{ParseCache, DEFAULT_PARSE_CACHE_CAPACITY};
use crate::locks::ResourceLockManager;
use crate::provider::{ModelTransport, ProviderPool, TransportRequest};
use crate::telemetry::{EventLog, NullSink, RunId, StreamEvent, TelemetryPipeline, TelemetrySink};
use crate::tools::{ExtractionFailure, ToolHost, ToolRegistry};
use crate::types::{ModelMessage, RunState, ToolCall, ToolResult, Usage};
use crate::util::RetryPolicy;

/// Drives runs against a set of model transports and a tool host.
///
/// Cloning is cheap; clones share the lock manager, so runs started from
/// clones of one runner are serialized on the same resources.
#[derive(Clone)]
pub struct AgentRunner {
    providers: Vec<Arc<dyn ModelTransport>>,
    tools: Arc<ToolRegistry>,
    host: Arc<dyn ToolHost>,
    locks: ResourceLockManager,
    config: RuntimeConfig,
    sink: Arc<dyn TelemetrySink>,
    event_log: Option<Arc<dyn EventLog>>,
    parse_cache: ParseCache,
}

impl AgentRunner {
    pub fn new(provider: Arc<dyn ModelTransport>, host: Arc<dyn ToolHost>) -> Self {
        let config = RuntimeConfig::default();
        Self {
            providers: vec![provider],
            tools: Arc::new(ToolRegistry::new()),
            host,
            locks: ResourceLockManager::new(config.locks.clone()),
            config,
            sink: Arc::new(NullSink),
            event_log: None,
            parse_cache: ParseCache::new(DEFAULT_PARSE_CACHE_CAPACITY),
        }
    }

    /// Add a failover transport, tried after the ones already configured.
    pub fn with_fallback(mut self, provider: Arc<dyn ModelTransport>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    /// Replace the configuration. Also rebuilds the lock manager.
    ///
    /// Fails with [`LatheError::Configuration`] if the config does not
    /// pass [`RuntimeConfig::validate`].
    pub fn with_config(mut self, config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        self.locks = ResourceLockManager::new(config.locks.clone());
        self.config = config;
        Ok(self)
    }

    /// Share a lock manager with other runners.
    pub fn with_lock_manager(mut self, locks: ResourceLockManager) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_event_log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.event_log = Some(log);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn lock_manager(&self) -> &ResourceLockManager {
        &self.locks
    }

    /// Argument parses shared by every run of this runner.
    pub fn parse_cache(&self) -> &ParseCache {
        &self.parse_cache
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Spawn a run on the current tokio runtime.
    pub fn start(&self, request: RunRequest) -> RunHandle {
        let cancel = CancellationToken::new();
        let (result_tx, result_rx) = oneshot::channel();
        let run_id = request.run_id;
        let runner = self.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let result = runner.run(request, token).await;
            let _ = result_tx.send(result);
        });
        RunHandle {
            run_id,
            cancel,
            result_rx,
        }
    }

    /// Run to completion, abort or failure.
    ///
    /// Cancelling `cancel` aborts the run and rolls the conversation and run
    /// state back to the start of the interrupted turn.
    pub async fn run(&self, request: RunRequest, cancel: CancellationToken) -> RunResult {
        let RunRequest {
            run_id,
            messages,
            objectives,
            session_id,
        } = request;
        let pipeline = self.pipeline(run_id);
        let limits = RunnerLimits::from_config(&self.config.runner);
        let mut state = RunState::new(run_id);
        state.reset_objectives(objectives);
        let mut conversation = Conversation::new(messages);

        let mut pool = match ProviderPool::new(self.providers.clone()) {
            Ok(pool) => pool,
            Err(err) => {
                return finish_run(&pipeline, state, conversation, RunEnd::from_error(err), 0)
            }
        };
        if let Some(max) = limits.max_failovers {
            pool = pool.with_max_failovers(max);
        }
        let retry = RetryPolicy::from(&self.config.retry);
        let definitions = {
            let mut defs = self.tools.definitions();
            if !self.tools.contains(UPDATE_OBJECTIVES) {
                defs.push(objectives::definition());
            }
            defs
        };

        tracing::debug!(
            run_id = %run_id,
            provider = %pool.current_name(),
            tools = definitions.len(),
            max_iterations = limits.max_iterations,
            "run started"
        );
        pipeline.emit(StreamEvent::RunStarted {
            provider: pool.current_name().to_string(),
        });
        transition(&mut state, RunPhase::Streaming);
        pipeline.progress(&state);

        let mut iterations = 0u32;
        let mut failed_tool_turns = 0u32;
        let end = loop {
            if cancel.is_cancelled() {
                break RunEnd::from_error(LatheError::Cancelled);
            }
            if iterations >= limits.max_iterations {
                break RunEnd::from_error(LatheError::InvalidState(format!(
                    "iteration limit of {} reached",
                    limits.max_iterations
                )));
            }
            iterations += 1;

            let snapshot = conversation.snapshot(&state);
            pipeline.reset_turn();
            pool.reset();
            transition(&mut state, RunPhase::Streaming);
            state.step_count += 1;

            let request = TransportRequest {
                messages: conversation.messages().to_vec(),
                tools: definitions.clone(),
                session_id: session_id.clone(),
            };
            let llm = run_llm_phase(LlmPhaseArgs {
                pool: &mut pool,
                retry: &retry,
                request: &request,
                pipeline: &pipeline,
                cache: &self.parse_cache,
                limits,
                cancel: &cancel,
            })
            .await;
            let turn = match llm {
                Ok(turn) => turn,
                Err(err) => {
                    conversation.restore(snapshot, &mut state);
                    break RunEnd::from_error(err);
                }
            };

            if turn.usage != Usage::default() {
                state.usage.merge(&turn.usage);
                pipeline.emit(StreamEvent::Usage {
                    usage: turn.usage.clone(),
                    total: state.usage.clone(),
                });
            }
            tracing::debug!(
                run_id = %run_id,
                iteration = iterations,
                calls = turn.calls.len(),
                malformed = turn.malformed.len(),
                finish_reason = ?turn.finish_reason,
                "model turn finished"
            );

            if turn.calls.is_empty() && turn.malformed.is_empty() {
                conversation.push(ModelMessage::assistant_turn(&turn.text, &[]));
                break RunEnd::Completed;
            }

            transition(&mut state, RunPhase::ExtractingTool);
            let mut recorded = turn.calls.clone();
            recorded.extend(turn.malformed.iter().map(malformed_call));
            conversation.push(ModelMessage::assistant_turn(&turn.text, &recorded));

            let phase = run_tool_phase(
                ToolPhaseArgs {
                    tools: &self.tools,
                    host: &self.host,
                    locks: &self.locks,
                    pipeline: &pipeline,
                    cancel: &cancel,
                },
                &mut state,
                &turn.calls,
            )
            .await;
            let mut results = match phase {
                Ok(results) => results,
                Err(err) => {
                    conversation.restore(snapshot, &mut state);
                    break RunEnd::from_error(err);
                }
            };
            results.extend(turn.malformed.iter().map(malformed_result));

            let all_failed = results.iter().all(|r| r.is_error);
            conversation.extend(
                results
                    .into_iter()
                    .map(|r| ModelMessage::tool_result(r.tool_call_id, r.result, r.is_error)),
            );
            transition(&mut state, RunPhase::Streaming);

            if all_failed {
                failed_tool_turns += 1;
                if failed_tool_turns >= limits.max_failed_tool_turns {
                    break RunEnd::from_error(LatheError::InvalidState(format!(
                        "{failed_tool_turns} consecutive tool turns failed"
                    )));
                }
            } else {
                failed_tool_turns = 0;
            }
        };

        finish_run(&pipeline, state, conversation, end, iterations)
    }

    fn pipeline(&self, run_id: RunId) -> TelemetryPipeline {
        let sink = Arc::clone(&self.sink);
        match &self.event_log {
            Some(log) => TelemetryPipeline::with_event_log(
                run_id,
                &self.config.telemetry,
                sink,
                Arc::clone(log),
            ),
            None => TelemetryPipeline::new(run_id, &self.config.telemetry, sink),
        }
    }
}

impl std::fmt::Debug for AgentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers: Vec<&str> = self.providers.iter().map(|p| p.provider_name()).collect();
        f.debug_struct("AgentRunner")
            .field("providers", &providers)
            .field("tools", &self.tools)
            .field("config", &self.config)
            .finish()
    }
}

/// The assistant-side record of a call whose arguments could not be parsed.
fn malformed_call(failure: &ExtractionFailure) -> ToolCall {
    ToolCall::new(
        failure.id.clone(),
        failure.name.clone().unwrap_or_else(|| "unknown".to_string()),
        serde_json::Value::String(failure.raw.clone()),
    )
}

fn malformed_result(failure: &ExtractionFailure) -> ToolResult {
    ToolResult::error(&failure.id, format!("malformed tool call: {}", failure.message))
}

/// Handle to a spawned run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    cancel: CancellationToken,
    result_rx: oneshot::Receiver<RunResult>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Request cancellation. Returns `false` if already requested.
    pub fn abort(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<RunResult> {
        self.result_rx
            .await
            .map_err(|_| LatheError::InvalidState(format!("run {} ended without a result", self.run_id)))
    }
}
