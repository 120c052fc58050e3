//! Core run types for the agent loop.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RunFailure;
use crate::telemetry::{PipelineStats, RunId};
use crate::types::{ModelMessage, Objective, Role, RunState};

/// Phases of the run state machine. Mirrored into [`RunState::stage`].
pub use crate::types::LifecycleStage as RunPhase;

/// How a run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Aborted,
    Failed,
}

/// Input of one run.
#[derive(Debug, Clone, Builder)]
pub struct RunRequest {
    #[builder(default = Uuid::new_v4())]
    pub run_id: RunId,
    /// Conversation so far, including the new user message.
    pub messages: Vec<ModelMessage>,
    #[builder(default)]
    pub objectives: Vec<Objective>,
    pub session_id: Option<String>,
}

impl RunRequest {
    /// Single user prompt.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::builder().messages(vec![ModelMessage::user(text)]).build()
    }
}

/// Result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Conversation at the end of the run. Rolled back to the last turn
    /// boundary when the run was aborted or failed mid-turn.
    pub messages: Vec<ModelMessage>,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub iterations: u32,
    pub stats: PipelineStats,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Text of the last assistant message, if any.
    pub fn final_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(ModelMessage::text)
    }
}
