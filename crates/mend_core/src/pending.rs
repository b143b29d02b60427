//! Fix applied by a single-shot remediation, awaiting its verdict.
//!
//! `remediate` applies a fix but leaves the rebuild to the caller, so the
//! outcome is only known on the next call. The applied fix is parked in
//! `<project>/.mend/pending-remediation.json` until then. Like the event
//! log, storage problems are logged and never fail a remediation.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use mend_memory::RepairOutcome;
use mend_patterns::{ErrorCategory, ErrorSignature};

use crate::config::state_dir;

pub const PENDING_FILE: &str = "pending-remediation.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRemediation {
    pub signature: ErrorSignature,
    pub category: ErrorCategory,
    pub fix_name: String,
    pub confidence: f64,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

impl PendingRemediation {
    /// The fix worked unless the next failure still shows its signature.
    pub fn verdict(&self, next: Option<&ErrorSignature>) -> RepairOutcome {
        if next == Some(&self.signature) {
            RepairOutcome::Failure
        } else {
            RepairOutcome::Success
        }
    }
}

#[derive(Debug, Default)]
pub struct PendingStore {
    path: Option<PathBuf>,
    slot: Mutex<Option<PendingRemediation>>,
}

impl PendingStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            slot: Mutex::new(None),
        }
    }

    pub fn for_project(project_root: &Path) -> Self {
        Self::at(state_dir(project_root).join(PENDING_FILE))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Park `pending`, replacing whatever was there.
    pub fn park(&self, pending: PendingRemediation) {
        if let Some(path) = &self.path {
            if let Err(e) = Self::write(path, &pending) {
                warn!("Failed to park pending remediation at {}: {}", path.display(), e);
            }
        }
        *self.slot.lock() = Some(pending);
    }

    /// Remove and return the parked remediation, if any.
    pub fn take(&self) -> Option<PendingRemediation> {
        let in_memory = self.slot.lock().take();
        let Some(path) = &self.path else {
            return in_memory;
        };

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return in_memory,
            Err(e) => {
                warn!("Failed to read pending remediation {}: {}", path.display(), e);
                return in_memory;
            }
        };
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to clear pending remediation {}: {}", path.display(), e);
        }
        match serde_json::from_str(&content) {
            Ok(pending) => Some(pending),
            Err(e) => {
                warn!("Discarding unreadable pending remediation {}: {}", path.display(), e);
                in_memory
            }
        }
    }

    fn write(path: &Path, pending: &PendingRemediation) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(pending)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)
    }
}
