//! Event pipeline: rate limit, reasoning budget, debounce, delta compression
//! and history pressure, in front of a sink.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::budget::{BudgetDecision, ReasoningBudget};
use super::event_log::EventLog;
use super::events::{EventEnvelope, ProgressSnapshot, RunId, StreamEvent};
use super::limiter::RateLimiter;
use super::pressure::{EventHistory, PressureMonitor};
use super::progress::ProgressTracker;
use super::sink::TelemetrySink;
use crate::config::TelemetryConfig;
use crate::types::RunState;

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub delivered: u64,
    pub dropped_rate_limited: u64,
    pub dropped_budget: u64,
    pub truncated: u64,
    pub pruned: u64,
}

struct PipelineState {
    seq: u64,
    limiter: RateLimiter,
    budget: ReasoningBudget,
    progress: ProgressTracker,
    history: EventHistory,
    last_objectives: Option<String>,
    last_achieved: Option<String>,
    stats: PipelineStats,
}

struct PipelineInner {
    run_id: RunId,
    state: Mutex<PipelineState>,
    sink: Arc<dyn TelemetrySink>,
    log: Option<Arc<dyn EventLog>>,
}

/// Per-run event pipeline. Cloning shares it.
///
/// Sinks are called while the pipeline is locked, so a sink must not emit
/// back into the same pipeline.
#[derive(Clone)]
pub struct TelemetryPipeline {
    inner: Arc<PipelineInner>,
}

impl TelemetryPipeline {
    pub fn new(run_id: RunId, config: &TelemetryConfig, sink: Arc<dyn TelemetrySink>) -> Self {
        Self::build(run_id, config, sink, None)
    }

    pub fn with_event_log(
        run_id: RunId,
        config: &TelemetryConfig,
        sink: Arc<dyn TelemetrySink>,
        log: Arc<dyn EventLog>,
    ) -> Self {
        Self::build(run_id, config, sink, Some(log))
    }

    fn build(
        run_id: RunId,
        config: &TelemetryConfig,
        sink: Arc<dyn TelemetrySink>,
        log: Option<Arc<dyn EventLog>>,
    ) -> Self {
        let state = PipelineState {
            seq: 0,
            limiter: RateLimiter::new(config.max_events_per_second, config.rate_window()),
            budget: ReasoningBudget::new(config.max_reasoning_events, config.max_reasoning_chars),
            progress: ProgressTracker::new(config.debounce()),
            history: EventHistory::new(PressureMonitor::new(
                config.pressure_threshold,
                config.prune_keep_head,
                config.prune_keep_tail,
            )),
            last_objectives: None,
            last_achieved: None,
            stats: PipelineStats::default(),
        };
        Self {
            inner: Arc::new(PipelineInner {
                run_id,
                state: Mutex::new(state),
                sink,
                log,
            }),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.inner.run_id
    }

    /// Offer an event. Returns whether it was delivered now.
    ///
    /// Progress updates may be held back by the debounce and delivered by a
    /// later [`Self::flush_due_progress`].
    pub fn emit(&self, event: StreamEvent) -> bool {
        let now = Instant::now();
        let mut state = self.lock();

        if !state.limiter.admit(event.is_noisy(), now) {
            state.stats.dropped_rate_limited += 1;
            return false;
        }

        let event = match event {
            StreamEvent::ReasoningDelta { text } => match state.budget.admit(&text) {
                BudgetDecision::Pass => StreamEvent::ReasoningDelta { text },
                BudgetDecision::Truncated(text) => {
                    state.stats.truncated += 1;
                    StreamEvent::ReasoningDelta { text }
                }
                BudgetDecision::Dropped => {
                    state.stats.dropped_budget += 1;
                    return false;
                }
            },
            StreamEvent::ProgressUpdate { snapshot } => {
                match state.progress.update(snapshot, now) {
                    Some(snapshot) => StreamEvent::ProgressUpdate { snapshot },
                    None => return false,
                }
            }
            other => other,
        };

        self.deliver(&mut state, event);
        true
    }

    /// Offer a full snapshot of `run_state`.
    pub fn progress(&self, run_state: &RunState) -> bool {
        self.emit(StreamEvent::ProgressUpdate {
            snapshot: ProgressSnapshot::from_state(run_state),
        })
    }

    /// When a held-back progress snapshot is due.
    pub fn progress_deadline(&self) -> Option<Instant> {
        self.lock().progress.deadline()
    }

    /// Deliver the trailing progress snapshot if its window has closed.
    pub fn flush_due_progress(&self) -> bool {
        let mut state = self.lock();
        match state.progress.poll(Instant::now()) {
            Some(snapshot) => {
                self.deliver(&mut state, StreamEvent::ProgressUpdate { snapshot });
                true
            }
            None => false,
        }
    }

    /// Deliver any held-back progress snapshot immediately.
    pub fn flush_progress(&self) -> bool {
        let mut state = self.lock();
        match state.progress.flush(Instant::now()) {
            Some(snapshot) => {
                self.deliver(&mut state, StreamEvent::ProgressUpdate { snapshot });
                true
            }
            None => false,
        }
    }

    /// Start a new model turn: the reasoning budget refills.
    pub fn reset_turn(&self) {
        self.lock().budget.reset_turn();
    }

    pub fn stats(&self) -> PipelineStats {
        self.lock().stats
    }

    /// Delivered events still held in memory.
    pub fn history(&self) -> Vec<EventEnvelope> {
        self.lock().history.entries().to_vec()
    }

    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    fn deliver(&self, state: &mut PipelineState, event: StreamEvent) {
        let envelope = self.dispatch(state, event);
        if let Some(report) = state.history.push(envelope) {
            state.stats.pruned += report.pruned() as u64;
            let notice = self.dispatch(
                state,
                StreamEvent::MemoryPressure {
                    history_len: report.after,
                    pruned: report.pruned(),
                },
            );
            // the notice itself never triggers another prune
            state.history.record(notice);
        }
    }

    /// Stamp, persist and hand an event to the sink.
    fn dispatch(&self, state: &mut PipelineState, event: StreamEvent) -> EventEnvelope {
        let event = match event {
            StreamEvent::ProgressUpdate { snapshot } => StreamEvent::ProgressUpdate {
                snapshot: compress(state, snapshot),
            },
            other => other,
        };
        let noisy = event.is_noisy();
        let envelope = EventEnvelope {
            run_id: self.inner.run_id,
            seq: state.seq,
            timestamp: Utc::now(),
            event,
        };
        state.seq += 1;
        state.stats.delivered += 1;

        if let Some(log) = &self.inner.log {
            if let Err(err) = log.append(&envelope) {
                tracing::warn!(run_id = %self.inner.run_id, error = %err, "event log append failed");
            }
        }
        if noisy {
            self.inner.sink.on_stream(&envelope);
        } else {
            self.inner.sink.on_event(&envelope);
        }
        envelope
    }

    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Omit `objectives`/`achieved` when unchanged since the last delivered
/// snapshot.
fn compress(state: &mut PipelineState, mut snapshot: ProgressSnapshot) -> ProgressSnapshot {
    if let Some(objectives) = &snapshot.objectives {
        let encoded = serde_json::to_string(objectives).ok();
        if encoded.is_some() && encoded == state.last_objectives {
            snapshot.objectives = None;
        } else {
            state.last_objectives = encoded;
        }
    }
    if let Some(achieved) = &snapshot.achieved {
        let encoded = serde_json::to_string(achieved).ok();
        if encoded.is_some() && encoded == state.last_achieved {
            snapshot.achieved = None;
        } else {
            state.last_achieved = encoded;
        }
    }
    snapshot
}

impl std::fmt::Debug for TelemetryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryPipeline")
            .field("run_id", &self.inner.run_id)
            .field("stats", &self.stats())
            .finish()
    }
}
