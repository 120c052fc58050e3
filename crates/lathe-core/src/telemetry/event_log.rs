//! Append-only JSONL event log.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::events::{EventEnvelope, RunId};
use crate::error::{LatheError, Result};

/// Persistent record of delivered events.
pub trait EventLog: Send + Sync {
    fn append(&self, envelope: &EventEnvelope) -> Result<()>;

    /// All events of `run_id`, in append order.
    fn read_all(&self, run_id: RunId) -> Result<Vec<EventEnvelope>>;
}

/// One `<run_id>.jsonl` file per run under a directory.
#[derive(Debug)]
pub struct JsonlEventLog {
    dir: PathBuf,
    write: Mutex<()>,
}

impl JsonlEventLog {
    /// Create the directory if missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run_id: RunId) -> PathBuf {
        self.dir.join(format!("{run_id}.jsonl"))
    }
}

impl EventLog for JsonlEventLog {
    fn append(&self, envelope: &EventEnvelope) -> Result<()> {
        let mut line = serde_json::to_string(envelope)?;
        line.push('\n');
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(envelope.run_id))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn read_all(&self, run_id: RunId) -> Result<Vec<EventEnvelope>> {
        let path = self.path_for(run_id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut events = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let envelope = serde_json::from_str(&line).map_err(|err| {
                LatheError::InvalidState(format!(
                    "{}:{}: invalid event record: {err}",
                    path.display(),
                    index + 1
                ))
            })?;
            events.push(envelope);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::events::StreamEvent;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn appends_and_replays_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlEventLog::open(dir.path().join("events")).unwrap();
        let run = Uuid::new_v4();
        let other = Uuid::new_v4();

        let records: Vec<EventEnvelope> = (0..3)
            .map(|seq| EventEnvelope {
                run_id: run,
                seq,
                timestamp: Utc::now(),
                event: StreamEvent::RunAborted {
                    reason: format!("r{seq}"),
                },
            })
            .collect();
        for record in &records {
            log.append(record).unwrap();
        }

        assert_eq!(log.read_all(run).unwrap(), records);
        assert!(log.read_all(other).unwrap().is_empty());
        let text = std::fs::read_to_string(log.path_for(run)).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn corrupt_lines_are_reported_with_position() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlEventLog::open(dir.path()).unwrap();
        let run = Uuid::new_v4();
        std::fs::write(log.path_for(run), "{not json}\n").unwrap();
        let err = log.read_all(run).unwrap_err();
        assert!(err.to_string().contains(":1:"), "{err}");
    }
}
