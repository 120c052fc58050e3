//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::arguments::ToolArguments;
use super::host::ToolHost;
use super::types::{ToolDefinition, ToolParameters};
use crate::error::Result;
use crate::locks::{LockMode, OwnerToken};

/// The resource a call touches, used as its lock key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolAccess {
    /// Runs without a resource lock.
    Unscoped,
    Resource { key: String, mode: LockMode },
}

impl ToolAccess {
    pub fn read(key: impl Into<String>) -> Self {
        Self::Resource {
            key: key.into(),
            mode: LockMode::Read,
        }
    }

    pub fn write(key: impl Into<String>) -> Self {
        Self::Resource {
            key: key.into(),
            mode: LockMode::Write,
        }
    }
}

/// Context available during tool execution.
#[derive(Clone)]
pub struct ToolContext {
    pub call_id: String,
    pub host: Arc<dyn ToolHost>,
    /// Owner of the lock this call holds; reuse it to re-enter that lock.
    pub owner: OwnerToken,
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("call_id", &self.call_id)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Core tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> &ToolParameters;

    /// Declare which resource a call will touch, before it runs.
    fn access(&self, _args: &ToolArguments, _host: &dyn ToolHost) -> Result<ToolAccess> {
        Ok(ToolAccess::Unscoped)
    }

    async fn execute(&self, args: &ToolArguments, ctx: &ToolContext) -> Result<Value>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().schema.clone(),
        }
    }
}

type ToolHandler = dyn Fn(ToolArguments, ToolContext) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>>
    + Send
    + Sync;

type AccessResolver = dyn Fn(&ToolArguments, &dyn ToolHost) -> Result<ToolAccess> + Send + Sync;

/// Closure-based tool.
pub struct AgentTool {
    name: String,
    description: String,
    parameters: ToolParameters,
    access: Option<Arc<AccessResolver>>,
    handler: Arc<ToolHandler>,
}

impl AgentTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            access: None,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }

    /// Attach the resolver that declares the call's lock key.
    pub fn with_access<A>(mut self, resolver: A) -> Self
    where
        A: Fn(&ToolArguments, &dyn ToolHost) -> Result<ToolAccess> + Send + Sync + 'static,
    {
        self.access = Some(Arc::new(resolver));
        self
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn access(&self, args: &ToolArguments, host: &dyn ToolHost) -> Result<ToolAccess> {
        match &self.access {
            Some(resolver) => resolver(args, host),
            None => Ok(ToolAccess::Unscoped),
        }
    }

    async fn execute(&self, args: &ToolArguments, ctx: &ToolContext) -> Result<Value> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Lock the file named by the `path` argument in `mode`.
pub fn path_access(
    mode: LockMode,
) -> impl Fn(&ToolArguments, &dyn ToolHost) -> Result<ToolAccess> + Send + Sync + 'static {
    move |args, host| {
        let path = host.resolve_path(args.get_str_opt("path").unwrap_or("."))?;
        Ok(ToolAccess::Resource {
            key: path.display().to_string(),
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::host::MemoryHost;
    use serde_json::json;

    fn read_tool() -> AgentTool {
        AgentTool::new(
            "read_file",
            "Read a file",
            ToolParameters::object().string("path", "file", true).build(),
            |args, ctx: ToolContext| async move {
                let path = ctx.host.resolve_path(args.get_str("path")?)?;
                Ok(json!({"content": ctx.host.read_file(&path).await?}))
            },
        )
        .with_access(path_access(LockMode::Read))
    }

    #[tokio::test]
    async fn closure_tool_runs_against_host() {
        let host: Arc<dyn ToolHost> = Arc::new(MemoryHost::default().with_file("a.txt", "hi"));
        let ctx = ToolContext {
            call_id: "c1".to_string(),
            host: Arc::clone(&host),
            owner: OwnerToken::new(),
            cancel: CancellationToken::new(),
        };
        let tool = read_tool();
        let out = tool
            .execute(&ToolArguments::new(json!({"path": "a.txt"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!({"content": "hi"}));
    }

    #[test]
    fn access_resolves_path_to_lock_key() {
        let host = MemoryHost::default();
        let access = read_tool()
            .access(&ToolArguments::new(json!({"path": "src/../a.txt"})), &host)
            .unwrap();
        assert_eq!(access, ToolAccess::read("/workspace/a.txt"));
    }

    #[test]
    fn tools_without_resolver_are_unscoped() {
        let tool = AgentTool::new("noop", "", ToolParameters::empty(), |_, _| async {
            Ok(Value::Null)
        });
        let host = MemoryHost::default();
        assert_eq!(
            tool.access(&ToolArguments::new(json!({})), &host).unwrap(),
            ToolAccess::Unscoped
        );
        assert_eq!(tool.definition().name, "noop");
    }
}
