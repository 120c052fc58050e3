//! Integration tests for the `lathe` meta-crate.
//!
//! Verifies that `local_runner()` wires the workspace and built-in tools,
//! that configuration loads from disk, and that re-exports are reachable
//! through the `lathe` namespace.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use lathe::prelude::*;

// ---------------------------------------------------------------------------
// Re-export accessibility
// ---------------------------------------------------------------------------

#[test]
fn transport_trait_is_accessible_via_lathe() {
    fn _assert_trait_accessible<T: lathe::provider::ModelTransport>() {}
    _assert_trait_accessible::<ScriptedTransport>();
}

#[test]
fn tool_host_is_accessible_via_lathe() {
    fn _assert_host<T: lathe::tools::ToolHost>() {}
    _assert_host::<LocalWorkspace>();
    _assert_host::<lathe::tools::MemoryHost>();
}

#[test]
fn error_type_is_accessible_via_lathe() {
    let err: LatheError = LatheError::transport("p", "503 Service Unavailable");
    assert_eq!(err.category(), ErrorCategory::Transient);
}

// ---------------------------------------------------------------------------
// local_runner()
// ---------------------------------------------------------------------------

#[test]
fn local_runner_registers_every_builtin_tool() {
    let dir = TempDir::new().unwrap();
    let runner = lathe::local_runner(dir.path(), Arc::new(ScriptedTransport::new("p"))).unwrap();
    let names: Vec<&str> = runner.tools().names().collect();
    assert_eq!(
        names,
        vec!["grep", "list_directory", "read_file", "shell", "write_file"]
    );
}

#[test]
fn local_runner_rejects_missing_directories() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope");
    let err = lathe::local_runner(&missing, Arc::new(ScriptedTransport::new("p"))).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

// ---------------------------------------------------------------------------
// Configuration files
// ---------------------------------------------------------------------------

#[test]
fn config_file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lathe.toml");
    std::fs::write(
        &path,
        r#"
[retry]
max_attempts = 5
base_delay_ms = 250

[locks]
watchdog_ms = 1000

[runner]
max_failovers = 2
"#,
    )
    .unwrap();

    let config = RuntimeConfig::load(&path).unwrap();
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.base_delay_ms, 250);
    assert_eq!(config.retry.max_delay_ms, 30_000);
    assert_eq!(config.locks.watchdog_ms, 1_000);
    assert_eq!(config.runner.max_failovers, Some(2));
    assert_eq!(config.telemetry, lathe::config::TelemetryConfig::default());
}

#[test]
fn invalid_config_files_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lathe.toml");

    std::fs::write(&path, "[retry]\nmax_attempts = 0\n").unwrap();
    let err = RuntimeConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("retry.max_attempts"));

    std::fs::write(&path, "[retry]\nmax_attemps = 3\n").unwrap();
    let err = RuntimeConfig::load(&path).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);

    assert!(RuntimeConfig::load(dir.path().join("missing.toml")).is_err());
}
