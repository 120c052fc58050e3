//! The workspace a tool acts on.
//!
//! The run loop only calls a [`ToolHost`] after the call's resource lock is
//! held. `lathe-tools` provides the filesystem implementation;
//! [`MemoryHost`] keeps files in memory for tests and dry runs.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio_util::sync::CancellationToken;

use crate::error::{LatheError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepMatch {
    pub path: String,
    pub line: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrepOptions {
    pub case_insensitive: bool,
    pub max_results: usize,
}

impl Default for GrepOptions {
    fn default() -> Self {
        Self {
            case_insensitive: false,
            max_results: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Capabilities a tool may use against the workspace.
#[async_trait]
pub trait ToolHost: Send + Sync {
    /// Map a model-supplied path to an absolute path inside the workspace.
    ///
    /// The result doubles as the resource lock key.
    fn resolve_path(&self, path: &str) -> Result<PathBuf>;

    async fn read_file(&self, path: &Path) -> Result<String>;

    /// Write `content`, creating parent directories. Returns bytes written.
    async fn write_file(&self, path: &Path, content: &str) -> Result<u64>;

    /// Entries sorted by name.
    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>>;

    async fn grep_search(
        &self,
        pattern: &str,
        path: &Path,
        options: &GrepOptions,
    ) -> Result<Vec<GrepMatch>>;

    async fn run_command(
        &self,
        request: &CommandRequest,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        Err(LatheError::UnsupportedOperation(format!(
            "this workspace cannot run commands: {}",
            request.command
        )))
    }
}

/// Resolve `path` against `root` lexically, refusing anything that escapes it.
pub fn resolve_within(root: &Path, path: &str) -> Result<PathBuf> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(LatheError::InvalidArgument("empty path".to_string()));
    }
    let candidate = Path::new(trimmed);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(escape_error(path));
                }
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    if !normalized.starts_with(root) {
        return Err(escape_error(path));
    }
    Ok(normalized)
}

fn escape_error(path: &str) -> LatheError {
    LatheError::InvalidArgument(format!("path escapes the workspace: {path}"))
}

/// In-memory workspace.
#[derive(Debug)]
pub struct MemoryHost {
    root: PathBuf,
    files: Mutex<BTreeMap<PathBuf, String>>,
}

impl MemoryHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: Mutex::new(BTreeMap::new()),
        }
    }

    /// Seed a file, relative to the root.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files().insert(self.root.join(path), content.to_string());
        self
    }

    /// Current content of a file, relative to the root.
    pub fn file(&self, path: &str) -> Option<String> {
        self.files().get(&self.root.join(path)).cloned()
    }

    fn files(&self) -> MutexGuard<'_, BTreeMap<PathBuf, String>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new("/workspace")
    }
}

#[async_trait]
impl ToolHost for MemoryHost {
    fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        resolve_within(&self.root, path)
    }

    async fn read_file(&self, path: &Path) -> Result<String> {
        self.files().get(path).cloned().ok_or_else(|| {
            LatheError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}: no such file", path.display()),
            ))
        })
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<u64> {
        self.files().insert(path.to_path_buf(), content.to_string());
        Ok(content.len() as u64)
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let files = self.files();
        let mut entries: BTreeMap<String, DirEntry> = BTreeMap::new();
        for (file, content) in files.iter() {
            let Ok(rest) = file.strip_prefix(path) else {
                continue;
            };
            let mut parts = rest.components();
            let Some(first) = parts.next() else {
                continue;
            };
            let name = first.as_os_str().to_string_lossy().into_owned();
            let is_dir = parts.next().is_some();
            entries.entry(name.clone()).or_insert(DirEntry {
                name,
                kind: if is_dir { EntryKind::Dir } else { EntryKind::File },
                size: if is_dir { 0 } else { content.len() as u64 },
            });
        }
        Ok(entries.into_values().collect())
    }

    async fn grep_search(
        &self,
        pattern: &str,
        path: &Path,
        options: &GrepOptions,
    ) -> Result<Vec<GrepMatch>> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(options.case_insensitive)
            .build()
            .map_err(|e| LatheError::InvalidArgument(format!("invalid pattern: {e}")))?;
        let files = self.files();
        let mut matches = Vec::new();
        for (file, content) in files.iter().filter(|(f, _)| f.starts_with(path)) {
            for (index, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(GrepMatch {
                        path: file.display().to_string(),
                        line: index as u64 + 1,
                        text: line.to_string(),
                    });
                    if matches.len() >= options.max_results {
                        return Ok(matches);
                    }
                }
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn relative_paths_resolve_under_root() {
        let root = Path::new("/ws");
        assert_eq!(resolve_within(root, "src/./lib.rs").unwrap(), PathBuf::from("/ws/src/lib.rs"));
        assert_eq!(resolve_within(root, "a/../b").unwrap(), PathBuf::from("/ws/b"));
        assert_eq!(resolve_within(root, "/ws/c").unwrap(), PathBuf::from("/ws/c"));
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let root = Path::new("/ws");
        assert!(resolve_within(root, "../etc/passwd").is_err());
        assert!(resolve_within(root, "/etc/passwd").is_err());
        assert!(resolve_within(root, "").is_err());
    }

    #[tokio::test]
    async fn memory_host_round_trip_and_listing() {
        let host = MemoryHost::default().with_file("src/lib.rs", "pub fn a() {}\n");
        let path = host.resolve_path("src/main.rs").unwrap();
        host.write_file(&path, "fn main() {}\n").await.unwrap();
        assert_eq!(host.read_file(&path).await.unwrap(), "fn main() {}\n");

        let root = host.resolve_path(".").unwrap();
        let entries = host.list_dir(&root).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Dir);

        let hits = host
            .grep_search("fn \\w+", &root, &GrepOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn commands_are_unsupported_by_default() {
        let host = MemoryHost::default();
        let err = host
            .run_command(
                &CommandRequest {
                    command: "ls".to_string(),
                    cwd: None,
                    timeout: Duration::from_secs(1),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LatheError::UnsupportedOperation(_)));
    }
}
