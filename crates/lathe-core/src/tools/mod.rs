//! Tool calls: extraction from model output, definitions and execution seams.

pub mod arguments;
pub mod assembler;
pub mod extract;
pub mod host;
pub mod registry;
pub mod tool;
pub mod types;

pub use arguments::ToolArguments;
pub use assembler::{ExtractionFailure, ToolCallAssembler};
pub use extract::{extract_tool_call, extract_tool_calls, strip_reasoning};
pub use host::{
    resolve_within, CommandOutput, CommandRequest, DirEntry, EntryKind, GrepMatch, GrepOptions,
    MemoryHost, ToolHost,
};
pub use registry::ToolRegistry;
pub use tool::{path_access, AgentTool, Tool, ToolAccess, ToolContext};
pub use types::{ParameterBuilder, ToolDefinition, ToolParameters};
