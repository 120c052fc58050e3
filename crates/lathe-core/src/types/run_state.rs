//! Per-run state shared by the orchestrator and the telemetry pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::usage::Usage;

/// Objective status. Transitions only move forward; see [`ObjectiveStatus::can_advance_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ObjectiveStatus {
    Pending,
    InProgress,
    Completed,
    Verified,
    Blocked,
    Skipped,
    Cancelled,
}

impl ObjectiveStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress | Self::Blocked => 1,
            Self::Completed => 2,
            Self::Verified | Self::Skipped | Self::Cancelled => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// `in_progress` and `blocked` share a tier and may swap; a terminal
    /// status never changes. Re-asserting the current status is allowed.
    pub fn can_advance_to(self, next: ObjectiveStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank() || (next.rank() == 1 && self.rank() == 1)
    }
}

/// A unit of work the agent is tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub label: String,
    pub status: ObjectiveStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Objective {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            status: ObjectiveStatus::Pending,
            evidence: None,
            context: None,
        }
    }
}

/// Run-loop lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleStage {
    Idle,
    Streaming,
    ExtractingTool,
    AwaitingLock,
    Executing,
    Finalizing,
    Completed,
    Aborted,
    Failed,
}

impl LifecycleStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }

    fn is_tool_stage(self) -> bool {
        matches!(
            self,
            Self::ExtractingTool | Self::AwaitingLock | Self::Executing
        )
    }

    /// Whether the state machine permits `self -> next`.
    pub fn can_transition_to(self, next: LifecycleStage) -> bool {
        use LifecycleStage::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Idle, Streaming) => true,
            (Streaming, Streaming | ExtractingTool) => true,
            (from, to) if from.is_tool_stage() && to.is_tool_stage() => true,
            (from, Streaming) if from.is_tool_stage() => true,
            (Finalizing, Completed | Aborted | Failed) => true,
            (Finalizing, _) => false,
            (_, Finalizing) => true,
            _ => false,
        }
    }
}

/// Mutable state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub step_count: u32,
    pub tool_count: u32,
    pub objectives: Vec<Objective>,
    pub achieved: Vec<String>,
    pub stage: LifecycleStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_file: Option<String>,
    pub usage: Usage,
}

impl RunState {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            step_count: 0,
            tool_count: 0,
            objectives: Vec::new(),
            achieved: Vec::new(),
            stage: LifecycleStage::Idle,
            active_tool: None,
            active_file: None,
            usage: Usage::default(),
        }
    }

    /// Replace the objective list. Only valid at a new-run boundary.
    pub fn reset_objectives(&mut self, objectives: Vec<Objective>) {
        self.objectives = objectives;
        self.achieved.clear();
    }

    /// Insert or advance an objective.
    ///
    /// Returns `false` (leaving the objective untouched) when the requested
    /// status would move backwards.
    pub fn upsert_objective(&mut self, objective: Objective) -> bool {
        let Some(existing) = self.objectives.iter_mut().find(|o| o.id == objective.id) else {
            if objective.status == ObjectiveStatus::Verified
                || objective.status == ObjectiveStatus::Completed
            {
                push_unique(&mut self.achieved, &objective.id);
            }
            self.objectives.push(objective);
            return true;
        };
        if !existing.status.can_advance_to(objective.status) {
            return false;
        }
        existing.status = objective.status;
        if !objective.label.is_empty() {
            existing.label = objective.label;
        }
        if objective.evidence.is_some() {
            existing.evidence = objective.evidence;
        }
        if objective.context.is_some() {
            existing.context = objective.context;
        }
        if matches!(
            existing.status,
            ObjectiveStatus::Completed | ObjectiveStatus::Verified
        ) {
            let id = existing.id.clone();
            push_unique(&mut self.achieved, &id);
        }
        true
    }

    /// Record an achieved item (deduplicated, insertion ordered).
    pub fn mark_achieved(&mut self, item: impl AsRef<str>) {
        push_unique(&mut self.achieved, item.as_ref());
    }
}

fn push_unique(items: &mut Vec<String>, item: &str) {
    if !items.iter().any(|existing| existing == item) {
        items.push(item.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objective_status_only_moves_forward() {
        use ObjectiveStatus::*;
        assert!(Pending.can_advance_to(InProgress));
        assert!(InProgress.can_advance_to(Blocked));
        assert!(Blocked.can_advance_to(InProgress));
        assert!(InProgress.can_advance_to(Completed));
        assert!(Completed.can_advance_to(Verified));
        assert!(!Completed.can_advance_to(InProgress));
        assert!(!Verified.can_advance_to(Completed));
        assert!(!Cancelled.can_advance_to(Skipped));
        assert!(Skipped.can_advance_to(Skipped));
    }

    #[test]
    fn upsert_rejects_backward_transition_and_tracks_achieved() {
        let mut state = RunState::new(Uuid::new_v4());
        assert!(state.upsert_objective(Objective::new("a", "write parser")));

        let mut done = Objective::new("a", "");
        done.status = ObjectiveStatus::Completed;
        done.evidence = Some("tests pass".to_string());
        assert!(state.upsert_objective(done));
        assert_eq!(state.achieved, vec!["a".to_string()]);
        assert_eq!(state.objectives[0].label, "write parser");

        let mut regress = Objective::new("a", "write parser");
        regress.status = ObjectiveStatus::Pending;
        assert!(!state.upsert_objective(regress));
        assert_eq!(state.objectives[0].status, ObjectiveStatus::Completed);
    }

    #[test]
    fn stages_must_pass_through_finalizing() {
        use LifecycleStage::*;
        assert!(Idle.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(ExtractingTool));
        assert!(ExtractingTool.can_transition_to(AwaitingLock));
        assert!(AwaitingLock.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Finalizing));
        assert!(Finalizing.can_transition_to(Aborted));
        assert!(!Streaming.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Streaming));
        assert!(!Finalizing.can_transition_to(Streaming));
    }
}
