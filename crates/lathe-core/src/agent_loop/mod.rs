//! Run-loop orchestrator.

pub mod history;
pub mod objectives;
pub mod runner;
pub mod types;

mod control;
mod limits;
mod llm_phase;
mod tool_phase;


pub use history::{Conversation, TurnSnapshot};
pub use objectives::UPDATE_OBJECTIVES;
pub use runner::{AgentRunner, RunHandle};
pub use types::{RunPhase, RunRequest, RunResult, RunStatus};
