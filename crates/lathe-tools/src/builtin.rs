//! Built-in coding tools.
//!
//! Provides the standard tools (`shell`, `read_file`, `write_file`,
//! `list_directory`, `grep`) a coding agent uses against its workspace. Each
//! tool goes through the [`ToolHost`](lathe_core::tools::ToolHost) of the
//! call context and declares the resource it touches so the run loop can lock
//! it first. File tools lock the resolved file path; `shell` write-locks the
//! workspace root.
//!
//! ```rust,no_run
//! let registry = lathe_tools::builtin::registry();
//! assert_eq!(registry.len(), 5);
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use lathe_core::error::LatheError;
use lathe_core::locks::LockMode;
use lathe_core::tools::{
    path_access, AgentTool, CommandRequest, GrepOptions, Tool, ToolAccess, ToolContext,
    ToolParameters, ToolRegistry,
};

const SHELL_OUTPUT_MAX_BYTES: usize = 32_768;
const READ_FILE_MAX_BYTES: usize = 65_536;
const GREP_MAX_RESULTS: usize = 200;
const SHELL_TIMEOUT: Duration = Duration::from_secs(30);
const TRUNCATION_NOTE: &str = "\n... (truncated)";

fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    s[..cutoff].to_string()
}

fn capped(text: &str, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text.to_string(), false);
    }
    let mut out = truncate_utf8(text, max_bytes);
    out.push_str(TRUNCATION_NOTE);
    (out, true)
}

/// `shell`: run a command via `sh -c` in the workspace root.
///
/// Holds the write lock on the workspace root while it runs. Output beyond
/// 32 KB is truncated.
pub fn shell_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "shell",
            "Execute a shell command in the workspace and return its output",
            ToolParameters::object()
                .string("command", "The shell command to execute", true)
                .integer("timeout_secs", "Timeout in seconds (default 30)", false)
                .build(),
            |args, ctx: ToolContext| async move {
                let command = args.get_str("command")?;
                let timeout = args
                    .get_i64_opt("timeout_secs")
                    .filter(|secs| *secs > 0)
                    .map(|secs| Duration::from_secs(secs as u64))
                    .unwrap_or(SHELL_TIMEOUT);

                let request = CommandRequest {
                    command: command.to_string(),
                    cwd: None,
                    timeout,
                };
                let output = ctx.host.run_command(&request, &ctx.cancel).await?;
                if output.timed_out {
                    return Err(LatheError::tool(
                        "shell",
                        format!("command timed out after {}s", timeout.as_secs()),
                    ));
                }

                let (combined, truncated) = capped(
                    &format!("{}{}", output.stdout, output.stderr),
                    SHELL_OUTPUT_MAX_BYTES,
                );
                Ok(json!({
                    "exit_code": output.exit_code,
                    "output": combined,
                    "truncated": truncated,
                }))
            },
        )
        .with_access(|_, host| {
            let root = host.resolve_path(".")?;
            Ok(ToolAccess::write(root.display().to_string()))
        }),
    )
}

/// `read_file`: read a file as UTF-8 text, capped at 64 KB.
pub fn read_file_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "read_file",
            "Read a file's contents as UTF-8 text",
            ToolParameters::object()
                .string("path", "Path to the file to read", true)
                .build(),
            |args, ctx: ToolContext| async move {
                let path = ctx.host.resolve_path(args.get_str("path")?)?;
                let content = ctx.host.read_file(&path).await?;

                let total_bytes = content.len();
                let (display, truncated) = capped(&content, READ_FILE_MAX_BYTES);
                Ok(json!({
                    "content": display,
                    "bytes": total_bytes,
                    "truncated": truncated,
                }))
            },
        )
        .with_access(path_access(LockMode::Read)),
    )
}

/// `write_file`: write content to a file, creating parent directories.
pub fn write_file_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "write_file",
            "Write content to a file, creating parent directories if needed",
            ToolParameters::object()
                .string("path", "Path to the file to write", true)
                .string("content", "Content to write to the file", true)
                .build(),
            |args, ctx: ToolContext| async move {
                let raw_path = args.get_str("path")?;
                let path = ctx.host.resolve_path(raw_path)?;
                let bytes = ctx.host.write_file(&path, args.get_str("content")?).await?;
                Ok(json!({
                    "success": true,
                    "path": raw_path,
                    "bytes_written": bytes,
                }))
            },
        )
        .with_access(path_access(LockMode::Write)),
    )
}

/// `list_directory`: sorted entries with `name`, `type` and `size`.
pub fn list_directory_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "list_directory",
            "List files and directories in a given path",
            ToolParameters::object()
                .string("path", "Path to the directory to list (defaults to '.')", false)
                .build(),
            |args, ctx: ToolContext| async move {
                let raw_path = args.get_str_opt("path").unwrap_or(".");
                let path = ctx.host.resolve_path(raw_path)?;
                let entries = ctx.host.list_dir(&path).await?;
                let count = entries.len();
                Ok(json!({
                    "path": raw_path,
                    "entries": entries,
                    "count": count,
                }))
            },
        )
        .with_access(path_access(LockMode::Read)),
    )
}

/// `grep`: regex search over workspace files.
pub fn grep_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "grep",
            "Search files for a regular expression",
            ToolParameters::object()
                .string("pattern", "The regular expression to search for", true)
                .string("path", "Directory or file to search in (defaults to '.')", false)
                .boolean("case_insensitive", "Ignore case when matching", false)
                .build(),
            |args, ctx: ToolContext| async move {
                let pattern = args.get_str("pattern")?;
                let path = ctx
                    .host
                    .resolve_path(args.get_str_opt("path").unwrap_or("."))?;
                let options = GrepOptions {
                    case_insensitive: args.get_bool_opt("case_insensitive").unwrap_or(false),
                    max_results: GREP_MAX_RESULTS,
                };
                let matches = ctx.host.grep_search(pattern, &path, &options).await?;
                let count = matches.len();
                Ok(json!({
                    "matches": matches,
                    "count": count,
                    "truncated": count >= GREP_MAX_RESULTS,
                }))
            },
        )
        .with_access(path_access(LockMode::Read)),
    )
}

/// Return all built-in coding tools.
pub fn all_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        shell_tool(),
        read_file_tool(),
        write_file_tool(),
        list_directory_tool(),
        grep_tool(),
    ]
}

/// A registry holding every built-in tool.
pub fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.extend(all_tools());
    registry
}
