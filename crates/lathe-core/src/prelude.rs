//! Convenience re-exports for common use.

pub use crate::agent_loop::{AgentRunner, RunHandle, RunRequest, RunResult, RunStatus};
pub use crate::config::RuntimeConfig;
pub use crate::error::{ErrorCategory, LatheError, Result, RunFailure};
pub use crate::locks::{LockMode, OwnerToken, ResourceLockManager};
pub use crate::provider::{ModelTransport, ProviderPool, ScriptedTransport, ScriptedTurn};
pub use crate::telemetry::{
    CallbackSink, ChannelSink, EventEnvelope, JsonlEventLog, StreamEvent, TelemetrySink,
};
pub use crate::tools::{
    path_access, AgentTool, Tool, ToolArguments, ToolHost, ToolParameters, ToolRegistry,
};
pub use crate::types::{
    ContentPart, FinishReason, LifecycleStage, ModelMessage, Objective, Role, RunState, ToolCall,
    ToolResult, TransportEvent, Usage,
};
