//! Conversation history with per-turn rollback.

use crate::types::{ModelMessage, RunState};

/// Restore point taken before a model turn.
#[derive(Debug, Clone)]
pub struct TurnSnapshot {
    message_count: usize,
    state: RunState,
}

impl TurnSnapshot {
    pub fn message_count(&self) -> usize {
        self.message_count
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }
}

/// Append-only message history of a run.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ModelMessage>,
}

impl Conversation {
    pub fn new(messages: Vec<ModelMessage>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: ModelMessage) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = ModelMessage>) {
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn snapshot(&self, state: &RunState) -> TurnSnapshot {
        TurnSnapshot {
            message_count: self.messages.len(),
            state: state.clone(),
        }
    }

    /// Drop everything appended since `snapshot` and restore the run state.
    pub fn restore(&mut self, snapshot: TurnSnapshot, state: &mut RunState) {
        self.messages.truncate(snapshot.message_count);
        *state = snapshot.state;
    }

    pub fn into_messages(self) -> Vec<ModelMessage> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Objective;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn restore_returns_to_the_snapshot_exactly() {
        let mut conversation = Conversation::new(vec![ModelMessage::user("fix it")]);
        let mut state = RunState::new(Uuid::new_v4());
        state.upsert_objective(Objective::new("o1", "fix"));
        let before_messages = conversation.messages().to_vec();
        let before_state = state.clone();

        let snapshot = conversation.snapshot(&state);
        conversation.push(ModelMessage::assistant("on it"));
        conversation.push(ModelMessage::tool_result("c1", serde_json::json!({}), false));
        state.step_count += 1;
        state.mark_achieved("o1");

        conversation.restore(snapshot, &mut state);
        assert_eq!(conversation.messages(), &before_messages[..]);
        assert_eq!(state, before_state);
    }
}
