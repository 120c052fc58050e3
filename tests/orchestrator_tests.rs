//! End-to-end runs against a real directory.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use lathe::config::LockConfig;
use lathe::prelude::*;
use lathe::provider::ScriptStep;
use lathe::telemetry::{ChannelSink, EventLog};

use common::{events, fast_config, recording_sink, tool_turn};

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("README.md"), "# Old title\n").unwrap();
    std::fs::create_dir(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/lib.rs"), "pub fn answer() -> u32 { 41 }\n").unwrap();
    dir
}

#[tokio::test]
async fn model_edits_files_in_the_workspace() {
    let dir = project();
    let provider = ScriptedTransport::new("scripted")
        .with_turn(tool_turn("c1", "read_file", r#"{"path": "README.md"}"#))
        .with_turn(tool_turn(
            "c2",
            "write_file",
            r##"{"path": "README.md", "content": "# New title\n"}"##,
        ))
        .with_turn(ScriptedTurn::text("Renamed the README title.", 6));
    let (sink, recorded) = recording_sink();
    let runner = lathe::local_runner(dir.path(), Arc::new(provider.clone()))
        .unwrap()
        .with_config(fast_config())
        .unwrap()
        .with_sink(sink);

    let result = runner.start(RunRequest::prompt("Retitle the README")).wait().await.unwrap();

    assert_eq!(result.status, RunStatus::Completed, "{:?}", result.failure);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("README.md")).unwrap(),
        "# New title\n"
    );
    assert_eq!(result.state.tool_count, 2);
    assert_eq!(result.messages.len(), 6);
    assert_eq!(result.final_text().as_deref(), Some("Renamed the README title."));

    let read_result = result.messages[2].tool_results()[0].clone();
    assert_eq!(read_result.result["content"], "# Old title\n");

    let tool_names: Vec<String> = provider.requests()[0]
        .tools
        .iter()
        .map(|tool| tool.name.clone())
        .collect();
    for name in ["shell", "read_file", "write_file", "list_directory", "grep", "update_objectives"] {
        assert!(tool_names.iter().any(|n| n == name), "missing {name}");
    }

    let seen = events(&recorded);
    assert!(matches!(seen.first(), Some(StreamEvent::RunStarted { .. })));
    assert!(matches!(seen.last(), Some(StreamEvent::RunCompleted { steps: 3, tool_count: 2, .. })));
}

#[tokio::test]
async fn inline_calls_run_real_tools() {
    let dir = project();
    let provider = ScriptedTransport::new("scripted")
        .with_turn(ScriptedTurn::text(
            "Searching. <tool_call>{\"name\": \"grep\", \"arguments\": {\"pattern\": \"answer\"}}</tool_call>",
            5,
        ))
        .with_turn(ScriptedTurn::text("Found it in src/lib.rs.", 8));
    let runner = lathe::local_runner(dir.path(), Arc::new(provider))
        .unwrap()
        .with_config(fast_config())
        .unwrap();

    let result = runner
        .run(RunRequest::prompt("Where is answer defined?"), CancellationToken::new())
        .await;

    assert!(result.is_completed(), "{:?}", result.failure);
    let grep = result.messages[2].tool_results()[0].clone();
    assert!(!grep.is_error);
    assert_eq!(grep.result["count"], 1);
    assert_eq!(grep.result["matches"][0]["path"], "src/lib.rs");
}

#[tokio::test]
async fn escaping_paths_come_back_as_tool_errors() {
    let dir = project();
    let provider = ScriptedTransport::new("scripted")
        .with_turn(tool_turn("c1", "read_file", r#"{"path": "../../etc/passwd"}"#))
        .with_turn(ScriptedTurn::text("Cannot read that.", 8));
    let runner = lathe::local_runner(dir.path(), Arc::new(provider))
        .unwrap()
        .with_config(fast_config())
        .unwrap();

    let result = runner
        .run(RunRequest::prompt("read it"), CancellationToken::new())
        .await;

    assert!(result.is_completed());
    let denied = result.messages[2].tool_results()[0].clone();
    assert!(denied.is_error);
    assert!(denied.result["error"].as_str().unwrap().contains("escapes the workspace"));
}

#[tokio::test]
async fn lock_timeouts_become_tool_errors_and_the_run_continues() {
    let dir = project();
    let provider = ScriptedTransport::new("scripted")
        .with_turn(tool_turn(
            "c1",
            "write_file",
            r##"{"path": "README.md", "content": "# Clobbered\n"}"##,
        ))
        .with_turn(ScriptedTurn::text("The README is busy.", 6));
    let config = RuntimeConfig {
        locks: LockConfig::builder().acquire_timeout_ms(200).build(),
        ..fast_config()
    };
    let runner = lathe::local_runner(dir.path(), Arc::new(provider))
        .unwrap()
        .with_config(config)
        .unwrap();

    let key = LocalWorkspace::new(dir.path())
        .unwrap()
        .resolve_path("README.md")
        .unwrap()
        .display()
        .to_string();
    let held = runner
        .lock_manager()
        .acquire(&key, LockMode::Write, None, None, &CancellationToken::new())
        .await
        .unwrap();

    let result = runner
        .run(RunRequest::prompt("Retitle the README"), CancellationToken::new())
        .await;
    drop(held);

    assert_eq!(result.status, RunStatus::Completed, "{:?}", result.failure);
    assert_eq!(result.final_text().as_deref(), Some("The README is busy."));
    let blocked = result.messages[2].tool_results()[0].clone();
    assert!(blocked.is_error);
    let message = blocked.result["error"].as_str().unwrap();
    assert!(message.contains("Timed out"), "{message}");
    assert!(message.contains("write lock"), "{message}");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("README.md")).unwrap(),
        "# Old title\n"
    );
    assert_eq!(runner.lock_manager().active_keys(), 0);
}

#[tokio::test]
async fn aborting_a_run_rolls_back_the_turn_in_flight() {
    let dir = project();
    let provider = ScriptedTransport::new("scripted")
        .with_turn(tool_turn("c1", "read_file", r#"{"path": "README.md"}"#))
        .with_turn(ScriptedTurn::text("Half an ans", 4).then(ScriptStep::Hang));
    let runner = lathe::local_runner(dir.path(), Arc::new(provider))
        .unwrap()
        .with_config(fast_config())
        .unwrap();

    let handle = runner.start(RunRequest::prompt("Summarize the README"));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(handle.abort());
    let result = handle.wait().await.unwrap();

    assert_eq!(result.status, RunStatus::Aborted);
    // user prompt, the first assistant turn and its tool result survive
    assert_eq!(result.messages.len(), 3);
    assert_eq!(result.state.step_count, 1);
    assert_eq!(result.state.stage, LifecycleStage::Aborted);
    assert_eq!(runner.lock_manager().active_keys(), 0);
}

#[tokio::test]
async fn events_are_persisted_to_the_jsonl_log() {
    let dir = project();
    let logs = TempDir::new().unwrap();
    let log = Arc::new(JsonlEventLog::open(logs.path()).unwrap());
    let (sink, mut rx) = ChannelSink::new(1_024);
    let provider = ScriptedTransport::new("scripted")
        .with_turn(tool_turn("c1", "list_directory", r#"{}"#))
        .with_turn(ScriptedTurn::text("Two entries.", 4));
    let runner = lathe::local_runner(dir.path(), Arc::new(provider))
        .unwrap()
        .with_config(fast_config())
        .unwrap()
        .with_sink(Arc::new(sink))
        .with_event_log(log.clone());

    let result = runner
        .run(RunRequest::prompt("What is here?"), CancellationToken::new())
        .await;
    assert!(result.is_completed());

    let mut streamed = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        streamed.push(envelope);
    }
    let persisted = log.read_all(result.run_id).unwrap();

    assert!(log.path_for(result.run_id).exists());
    assert_eq!(persisted, streamed);
    let seqs: Vec<u64> = persisted.iter().map(|envelope| envelope.seq).collect();
    let expected: Vec<u64> = (0..persisted.len() as u64).collect();
    assert_eq!(seqs, expected);
    assert!(persisted.iter().all(|envelope| envelope.run_id == result.run_id));
}
