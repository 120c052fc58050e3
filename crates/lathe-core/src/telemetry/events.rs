//! Telemetry event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::error::{ErrorClass, RunFailure};
use crate::locks::{LockDiagnostic, LockMode};
use crate::types::{LifecycleStage, Objective, RunState, Usage};

/// Unique identifier of a run.
pub type RunId = Uuid;

/// Coarse grouping used by the rate limiter and sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventClass {
    Lifecycle,
    Content,
    Reasoning,
    Tool,
    Progress,
    Diagnostic,
}

/// Progress snapshot of a run.
///
/// `objectives` and `achieved` are `None` when unchanged since the previous
/// snapshot on the same pipeline; [`SnapshotDecoder`] fills them back in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub stage: LifecycleStage,
    pub step_count: u32,
    pub tool_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objectives: Option<Vec<Objective>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub achieved: Option<Vec<String>>,
}

impl ProgressSnapshot {
    /// Full snapshot of `state`.
    pub fn from_state(state: &RunState) -> Self {
        Self {
            stage: state.stage,
            step_count: state.step_count,
            tool_count: state.tool_count,
            active_tool: state.active_tool.clone(),
            active_file: state.active_file.clone(),
            objectives: Some(state.objectives.clone()),
            achieved: Some(state.achieved.clone()),
        }
    }
}

/// Every event a run can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    RunStarted {
        provider: String,
    },
    ContentDelta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    ToolDelta {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        arguments_delta: String,
    },
    ToolStarted {
        call_id: String,
        name: String,
        input: serde_json::Value,
    },
    /// A finished tool call.
    Tool {
        call_id: String,
        name: String,
        result: serde_json::Value,
        is_error: bool,
        duration_ms: u64,
    },
    Usage {
        usage: Usage,
        total: Usage,
    },
    ProgressUpdate {
        snapshot: ProgressSnapshot,
    },
    LockWaiting {
        key: String,
        mode: LockMode,
        waited_ms: u64,
        readers: usize,
        writer_depth: usize,
    },
    RetryScheduled {
        provider: String,
        attempt: u32,
        delay_ms: u64,
        class: ErrorClass,
        message: String,
    },
    ProviderFailover {
        from: String,
        to: String,
        reason: String,
    },
    /// The deltas streamed since the turn began came from a failed attempt
    /// and will be streamed again. Consumers drop what they rendered.
    StreamReset {
        provider: String,
        discarded_deltas: u32,
    },
    MemoryPressure {
        history_len: usize,
        pruned: usize,
    },
    RunCompleted {
        steps: u32,
        tool_count: u32,
        usage: Usage,
    },
    RunAborted {
        reason: String,
    },
    RunError {
        failure: RunFailure,
    },
}

impl StreamEvent {
    pub fn class(&self) -> EventClass {
        match self {
            Self::RunStarted { .. }
            | Self::RunCompleted { .. }
            | Self::RunAborted { .. }
            | Self::RunError { .. } => EventClass::Lifecycle,
            Self::ContentDelta { .. } => EventClass::Content,
            Self::ReasoningDelta { .. } => EventClass::Reasoning,
            Self::ToolDelta { .. } | Self::ToolStarted { .. } | Self::Tool { .. } => {
                EventClass::Tool
            }
            Self::Usage { .. } | Self::ProgressUpdate { .. } => EventClass::Progress,
            Self::LockWaiting { .. }
            | Self::RetryScheduled { .. }
            | Self::ProviderFailover { .. }
            | Self::StreamReset { .. }
            | Self::MemoryPressure { .. } => EventClass::Diagnostic,
        }
    }

    /// High-frequency deltas that may be shed under load.
    pub fn is_noisy(&self) -> bool {
        matches!(
            self,
            Self::ContentDelta { .. } | Self::ReasoningDelta { .. } | Self::ToolDelta { .. }
        )
    }

    pub fn lock_waiting(diagnostic: &LockDiagnostic) -> Self {
        Self::LockWaiting {
            key: diagnostic.key.clone(),
            mode: diagnostic.mode,
            waited_ms: diagnostic.waited.as_millis() as u64,
            readers: diagnostic.readers,
            writer_depth: diagnostic.writer_depth,
        }
    }
}

/// An emitted event with its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub run_id: RunId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: StreamEvent,
}

/// Consumer-side reconstruction of delta-compressed snapshots.
#[derive(Debug, Default, Clone)]
pub struct SnapshotDecoder {
    objectives: Vec<Objective>,
    achieved: Vec<String>,
}

impl SnapshotDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill omitted fields from the previous snapshot.
    pub fn decode(&mut self, mut snapshot: ProgressSnapshot) -> ProgressSnapshot {
        match &snapshot.objectives {
            Some(objectives) => self.objectives = objectives.clone(),
            None => snapshot.objectives = Some(self.objectives.clone()),
        }
        match &snapshot.achieved {
            Some(achieved) => self.achieved = achieved.clone(),
            None => snapshot.achieved = Some(self.achieved.clone()),
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let event = StreamEvent::ToolDelta {
            call_id: "c1".to_string(),
            name: None,
            arguments_delta: "{\"pa".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "tool_delta", "call_id": "c1", "arguments_delta": "{\"pa"})
        );
        assert!(event.is_noisy());
        assert_eq!(event.class(), EventClass::Tool);
    }

    #[test]
    fn decoder_restores_omitted_fields() {
        let mut state = RunState::new(Uuid::new_v4());
        state.upsert_objective(Objective::new("o1", "Write tests"));
        state.mark_achieved("compiled");

        let mut decoder = SnapshotDecoder::new();
        let full = ProgressSnapshot::from_state(&state);
        assert_eq!(decoder.decode(full.clone()), full);

        let compressed = ProgressSnapshot {
            step_count: 2,
            objectives: None,
            achieved: None,
            ..full.clone()
        };
        let decoded = decoder.decode(compressed);
        assert_eq!(decoded.objectives, full.objectives);
        assert_eq!(decoded.achieved, full.achieved);
        assert_eq!(decoded.step_count, 2);
    }
}
