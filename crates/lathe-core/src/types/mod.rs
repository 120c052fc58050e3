//! Shared types: messages, usage, stream events, tool calls and run state.

pub mod message;
pub mod run_state;
pub mod stream;
pub mod tool_call;
pub mod usage;

pub use message::{ContentPart, ModelMessage, Role, ToolResult};
pub use run_state::{LifecycleStage, Objective, ObjectiveStatus, RunState};
pub use stream::{FinishReason, TransportEvent};
pub use tool_call::{ToolCall, ToolCallFragment};
pub use usage::Usage;
