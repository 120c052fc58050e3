//! Built-in `update_objectives` tool.
//!
//! Handled by the run loop itself because it mutates [`RunState`]; it takes
//! no resource lock.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{LatheError, Result};
use crate::tools::{ToolDefinition, ToolParameters};
use crate::types::{Objective, ObjectiveStatus, RunState};

pub const UPDATE_OBJECTIVES: &str = "update_objectives";

#[derive(Debug, Deserialize)]
struct ObjectivesUpdate {
    objectives: Vec<ObjectiveUpdate>,
}

#[derive(Debug, Deserialize)]
struct ObjectiveUpdate {
    id: String,
    #[serde(default)]
    label: String,
    #[serde(default = "default_status")]
    status: ObjectiveStatus,
    #[serde(default)]
    evidence: Option<String>,
    #[serde(default)]
    context: Option<String>,
}

fn default_status() -> ObjectiveStatus {
    ObjectiveStatus::Pending
}

pub fn definition() -> ToolDefinition {
    let item = json!({
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "label": {"type": "string"},
            "status": {
                "type": "string",
                "enum": ["pending", "in_progress", "completed", "verified", "blocked", "skipped", "cancelled"]
            },
            "evidence": {"type": "string"},
            "context": {"type": "string"}
        },
        "required": ["id", "status"]
    });
    let parameters: ToolParameters = ToolParameters::object()
        .array("objectives", "Objectives to add or advance", item, true)
        .build();
    ToolDefinition {
        name: UPDATE_OBJECTIVES.to_string(),
        description: "Add objectives or move them forward (pending, in_progress, completed, verified). \
                      Statuses never move backwards."
            .to_string(),
        parameters: parameters.schema,
    }
}

/// Apply an update to `state`; backwards transitions are reported, not applied.
pub fn apply(state: &mut RunState, input: &Value) -> Result<Value> {
    let update: ObjectivesUpdate = serde_json::from_value(input.clone())
        .map_err(|err| LatheError::InvalidArgument(format!("{UPDATE_OBJECTIVES}: {err}")))?;

    let mut applied = Vec::new();
    let mut rejected = Vec::new();
    for item in update.objectives {
        let id = item.id.clone();
        let objective = Objective {
            id: item.id,
            label: item.label,
            status: item.status,
            evidence: item.evidence,
            context: item.context,
        };
        if state.upsert_objective(objective) {
            applied.push(id);
        } else {
            rejected.push(id);
        }
    }
    Ok(json!({ "applied": applied, "rejected": rejected }))
}
