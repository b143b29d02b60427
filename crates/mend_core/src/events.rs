//! Append-only pipeline event log.
//!
//! Every diagnosis, fix and escalation is appended as one JSON line to
//! `<project>/.mend/events.jsonl`. Writing the log never fails a run; an
//! I/O error is logged and the event is still kept in memory.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::state_dir;
use crate::phase::PipelinePhase;

pub const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub phase: PipelinePhase,
    pub level: EventLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Default)]
pub struct EventLog {
    path: Option<PathBuf>,
    events: Mutex<Vec<PipelineEvent>>,
}

impl EventLog {
    /// Keep events in memory only.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn for_project(project_root: &Path) -> Self {
        Self::to_file(state_dir(project_root).join(EVENTS_FILE))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().clone()
    }

    pub fn append(&self, event: PipelineEvent) {
        if let Some(path) = &self.path {
            if let Err(e) = Self::write_line(path, &event) {
                warn!("Failed to append event to {}: {}", path.display(), e);
            }
        }
        self.events.lock().push(event);
    }

    fn write_line(path: &Path, event: &PipelineEvent) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json)
    }

    /// Read a persisted log back.
    pub fn load(path: &Path) -> std::io::Result<Vec<PipelineEvent>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(std::io::Error::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(message: &str) -> PipelineEvent {
        PipelineEvent {
            timestamp: Utc::now(),
            run_id: "run-1".to_string(),
            phase: PipelinePhase::BuildRetry,
            level: EventLevel::Info,
            message: message.to_string(),
            attempt: Some(1),
            signature: None,
        }
    }

    #[test]
    fn test_events_append_as_json_lines() {
        let temp = TempDir::new().unwrap();
        let log = EventLog::for_project(temp.path());

        log.append(event("build failed"));
        log.append(event("applied docker_prune"));

        let path = temp.path().join(".mend").join(EVENTS_FILE);
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(!content.contains("signature"));

        let loaded = EventLog::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].message, "applied docker_prune");
    }

    #[test]
    fn test_in_memory_log() {
        let log = EventLog::in_memory();
        log.append(event("x"));
        assert_eq!(log.events().len(), 1);
        assert!(log.path().is_none());
    }
}
