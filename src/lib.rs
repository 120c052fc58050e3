//! Lathe: an autonomous coding-agent runtime
//!
//! Drives a conversation with a language model, extracts the tool calls it
//! streams (native deltas or inline tags, repaired when malformed), runs them
//! against a workspace under per-resource locks, and reports progress through
//! a rate-limited telemetry pipeline. Failed turns roll back; transient
//! provider failures retry with backoff and fail over to the next provider.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use lathe::prelude::*;
//!
//! # async fn example() -> lathe::error::Result<()> {
//! let provider = Arc::new(
//!     ScriptedTransport::new("demo").with_turn(ScriptedTurn::text("Nothing to do.", 8)),
//! );
//! let runner = lathe::local_runner("./my-project", provider)?;
//! let result = runner.start(RunRequest::prompt("Tidy up the README")).wait().await?;
//! println!("{:?}: {:?}", result.status, result.final_text());
//! # Ok(())
//! # }
//! ```

pub use lathe_core::{
    agent_loop, config, error, json, locks, provider, stream, telemetry, tools, types, util,
};
pub use lathe_tools::{builtin, LocalWorkspace};

pub mod prelude;

use std::path::Path;
use std::sync::Arc;

use lathe_core::agent_loop::AgentRunner;
use lathe_core::error::Result;
use lathe_core::provider::ModelTransport;

/// A runner over a local directory with every built-in tool registered.
pub fn local_runner(
    root: impl AsRef<Path>,
    provider: Arc<dyn ModelTransport>,
) -> Result<AgentRunner> {
    let workspace = LocalWorkspace::new(root)?;
    tracing::debug!(root = %workspace.root().display(), "opened local workspace");
    Ok(AgentRunner::new(provider, Arc::new(workspace)).with_tools(builtin::registry()))
}
