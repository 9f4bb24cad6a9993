use super::EventSink;
use crate::error::{DispatchError, Result};
use crate::types::FileEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One line of an outbox file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxRecord {
    pub dispatched_at: DateTime<Utc>,
    pub destination: String,
    pub event: FileEvent,
}

/// Appends dispatch events to `<dir>/<destination>.jsonl` for a relay to
/// pick up.
#[derive(Debug)]
pub struct OutboxEventSink {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl OutboxEventSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn outbox_path(&self, destination: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", sanitize_destination(destination)))
    }

    /// Every record written for a destination, oldest first.
    pub fn read_records(&self, destination: &str) -> Result<Vec<OutboxRecord>> {
        read_jsonl(&self.outbox_path(destination))
    }
}

impl EventSink for OutboxEventSink {
    fn dispatch(&self, destination: &str, event: &FileEvent) -> Result<()> {
        let record = OutboxRecord {
            dispatched_at: Utc::now(),
            destination: destination.to_string(),
            event: event.clone(),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self
            .lock
            .lock()
            .map_err(|_| DispatchError::storage("outbox lock poisoned"))?;
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.outbox_path(destination))?;
        file.write_all(&line)?;
        Ok(())
    }
}

fn read_jsonl(path: &Path) -> Result<Vec<OutboxRecord>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(DispatchError::from))
        .collect()
}

fn sanitize_destination(destination: &str) -> String {
    destination
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') { ch } else { '_' })
        .collect()
}

/// Records dispatch events in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<(String, FileEvent)>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(destination, event)` pairs.
    pub fn events(&self) -> Vec<(String, FileEvent)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for MemoryEventSink {
    fn dispatch(&self, destination: &str, event: &FileEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| DispatchError::storage("event sink lock poisoned"))?
            .push((destination.to_string(), event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(url: &str) -> FileEvent {
        FileEvent {
            use_case: "uc".to_string(),
            presigned_url: url.to_string(),
            metadata_presigned_url: None,
        }
    }

    #[test]
    fn test_outbox_appends_lines() {
        let temp = TempDir::new().unwrap();
        let sink = OutboxEventSink::new(temp.path().join("outbox"));
        sink.dispatch("dms-handler", &event("http://a")).unwrap();
        sink.dispatch("dms-handler", &event("http://b")).unwrap();

        let records = sink.read_records("dms-handler").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].event.presigned_url, "http://b");
        assert!(temp.path().join("outbox/dms-handler.jsonl").exists());
    }

    #[test]
    fn test_destination_is_sanitized() {
        let sink = OutboxEventSink::new("/tmp/x");
        assert!(sink.outbox_path("../evil").ends_with(".._evil.jsonl"));
    }

    #[test]
    fn test_memory_sink_records() {
        let sink = MemoryEventSink::new();
        sink.dispatch("d", &event("http://a")).unwrap();
        assert_eq!(sink.events().len(), 1);
    }
}
