use chrono::Utc;

use super::history::Conversation;
use super::types::{RunPhase, RunResult, RunStatus};
use crate::error::{LatheError, RunFailure};
use crate::telemetry::{StreamEvent, TelemetryPipeline};
use crate::types::RunState;

/// How the turn loop ended.
#[derive(Debug)]
pub(super) enum RunEnd {
    Completed,
    Aborted(String),
    Failed(RunFailure),
}

impl RunEnd {
    pub(super) fn from_error(err: LatheError) -> Self {
        if err.is_cancelled() {
            Self::Aborted("cancelled".to_string())
        } else {
            Self::Failed(err.to_failure())
        }
    }
}

/// Move the run to `next`, refusing transitions the state machine forbids.
pub(super) fn transition(state: &mut RunState, next: RunPhase) -> bool {
    let from = state.stage;
    if from == next {
        return true;
    }
    if !from.can_transition_to(next) {
        tracing::warn!(run_id = %state.run_id, %from, to = %next, "rejected run phase transition");
        return false;
    }
    tracing::debug!(run_id = %state.run_id, %from, to = %next, "run phase transition");
    state.stage = next;
    true
}

pub(super) fn finish_run(
    pipeline: &TelemetryPipeline,
    mut state: RunState,
    conversation: Conversation,
    end: RunEnd,
    iterations: u32,
) -> RunResult {
    transition(&mut state, RunPhase::Finalizing);
    let (status, terminal, failure, event) = match end {
        RunEnd::Completed => (
            RunStatus::Completed,
            RunPhase::Completed,
            None,
            StreamEvent::RunCompleted {
                steps: state.step_count,
                tool_count: state.tool_count,
                usage: state.usage.clone(),
            },
        ),
        RunEnd::Aborted(reason) => (
            RunStatus::Aborted,
            RunPhase::Aborted,
            None,
            StreamEvent::RunAborted { reason },
        ),
        RunEnd::Failed(failure) => (
            RunStatus::Failed,
            RunPhase::Failed,
            Some(failure.clone()),
            StreamEvent::RunError { failure },
        ),
    };
    transition(&mut state, terminal);
    state.active_tool = None;
    state.active_file = None;
    pipeline.progress(&state);
    pipeline.flush_progress();
    pipeline.emit(event);

    tracing::debug!(
        run_id = %state.run_id,
        status = ?status,
        iterations,
        tool_count = state.tool_count,
        "run finished"
    );
    RunResult {
        run_id: state.run_id,
        status,
        messages: conversation.into_messages(),
        state,
        failure,
        iterations,
        stats: pipeline.stats(),
        finished_at: Utc::now(),
    }
}
