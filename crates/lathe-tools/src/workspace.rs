//! A workspace rooted at a directory on the local filesystem.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use ignore::WalkBuilder;
use regex::RegexBuilder;
use tokio_util::sync::CancellationToken;

use lathe_core::error::{LatheError, Result};
use lathe_core::tools::{
    resolve_within, CommandOutput, CommandRequest, DirEntry, EntryKind, GrepMatch, GrepOptions,
    ToolHost,
};

/// Local directory exposed to tools.
///
/// Every model-supplied path is resolved under the root; paths that climb
/// out of it are rejected.
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    /// Open an existing directory as the workspace root.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = std::fs::canonicalize(root.as_ref()).map_err(|e| {
            LatheError::Configuration(format!(
                "workspace root {}: {e}",
                root.as_ref().display()
            ))
        })?;
        if !root.is_dir() {
            return Err(LatheError::Configuration(format!(
                "workspace root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

fn io_error(path: &Path, error: std::io::Error) -> LatheError {
    LatheError::Io(std::io::Error::new(
        error.kind(),
        format!("{}: {error}", path.display()),
    ))
}

#[async_trait]
impl ToolHost for LocalWorkspace {
    fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        resolve_within(&self.root, path)
    }

    async fn read_file(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<u64> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error(parent, e))?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| io_error(path, e))?;
        Ok(content.len() as u64)
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let mut read_dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| io_error(path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_error(path, e))? {
            let metadata = entry.metadata().await.map_err(|e| io_error(path, e))?;
            let kind = if metadata.is_dir() {
                EntryKind::Dir
            } else if metadata.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
                size: if metadata.is_file() { metadata.len() } else { 0 },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
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

        let mut files: Vec<PathBuf> = WalkBuilder::new(path)
            .hidden(true)
            .git_ignore(true)
            .parents(true)
            .build()
            .flatten()
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .map(|entry| entry.into_path())
            .collect();
        files.sort();

        let mut matches = Vec::new();
        for file in files {
            // Binary and non-UTF-8 files are skipped.
            let Ok(content) = tokio::fs::read_to_string(&file).await else {
                continue;
            };
            for (index, line) in content.lines().enumerate() {
                if !regex.is_match(line) {
                    continue;
                }
                matches.push(GrepMatch {
                    path: self.display_path(&file),
                    line: index as u64 + 1,
                    text: line.to_string(),
                });
                if matches.len() >= options.max_results {
                    return Ok(matches);
                }
            }
        }
        Ok(matches)
    }

    async fn run_command(
        &self,
        request: &CommandRequest,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        let cwd = match &request.cwd {
            Some(dir) => resolve_within(&self.root, &dir.to_string_lossy())?,
            None => self.root.clone(),
        };
        tracing::debug!(command = %request.command, cwd = %cwd.display(), "running command");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&request.command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LatheError::tool("shell", e.to_string()))?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LatheError::Cancelled),
            _ = tokio::time::sleep(request.timeout) => {
                tracing::warn!(
                    command = %request.command,
                    timeout_ms = request.timeout.as_millis() as u64,
                    "command timed out"
                );
                Ok(CommandOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: true,
                })
            }
            output = child.wait_with_output() => {
                let output = output.map_err(|e| LatheError::tool("shell", e.to_string()))?;
                Ok(CommandOutput {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    timed_out: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn workspace() -> (tempfile::TempDir, LocalWorkspace) {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path()).unwrap();
        (dir, ws)
    }

    #[test]
    fn missing_root_is_a_configuration_error() {
        let err = LocalWorkspace::new("/definitely/not/here").unwrap_err();
        assert!(matches!(err, LatheError::Configuration(_)));
    }

    #[test]
    fn paths_outside_root_are_rejected() {
        let (_dir, ws) = workspace();
        assert!(ws.resolve_path("../outside.txt").is_err());
        assert_eq!(ws.resolve_path("a/./b.txt").unwrap(), ws.root().join("a/b.txt"));
    }

    #[tokio::test]
    async fn write_creates_parents_and_read_returns_content() {
        let (_dir, ws) = workspace();
        let path = ws.resolve_path("nested/deep/file.txt").unwrap();
        assert_eq!(ws.write_file(&path, "hello").await.unwrap(), 5);
        assert_eq!(ws.read_file(&path).await.unwrap(), "hello");

        let missing = ws.resolve_path("nope.txt").unwrap();
        let err = ws.read_file(&missing).await.unwrap_err();
        assert!(err.to_string().contains("nope.txt"));
    }

    #[tokio::test]
    async fn list_dir_is_sorted_and_typed() {
        let (dir, ws) = workspace();
        std::fs::write(dir.path().join("b.txt"), "12345").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        let entries = ws.list_dir(ws.root()).await.unwrap();
        assert_eq!(
            entries,
            vec![
                DirEntry { name: "a".into(), kind: EntryKind::Dir, size: 0 },
                DirEntry { name: "b.txt".into(), kind: EntryKind::File, size: 5 },
            ]
        );
    }

    #[tokio::test]
    async fn grep_walks_files_and_honors_limits() {
        let (dir, ws) = workspace();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "fn alpha() {}\nfn beta() {}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "Alpha docs\n").unwrap();

        let hits = ws
            .grep_search("alpha", ws.root(), &GrepOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "src/lib.rs");
        assert_eq!(hits[0].line, 1);

        let options = GrepOptions {
            case_insensitive: true,
            max_results: 1,
        };
        let limited = ws.grep_search("alpha", ws.root(), &options).await.unwrap();
        assert_eq!(limited.len(), 1);

        let err = ws
            .grep_search("(", ws.root(), &GrepOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LatheError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn commands_run_in_root_and_capture_output() {
        let (_dir, ws) = workspace();
        let output = ws
            .run_command(
                &CommandRequest {
                    command: "pwd; echo oops >&2; exit 3".into(),
                    cwd: None,
                    timeout: Duration::from_secs(10),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(PathBuf::from(output.stdout.trim()), ws.root());
        assert_eq!(output.stderr.trim(), "oops");
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn slow_commands_time_out_and_cancel() {
        let (_dir, ws) = workspace();
        let request = CommandRequest {
            command: "sleep 30".into(),
            cwd: None,
            timeout: Duration::from_millis(100),
        };
        let output = ws.run_command(&request, &CancellationToken::new()).await.unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let long = CommandRequest {
            timeout: Duration::from_secs(30),
            ..request
        };
        let err = ws.run_command(&long, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
