//! Repair memory stores.
//!
//! The on-disk form is a pretty-printed JSON list of entries, by default at
//! `<project>/.mend/repair-memory.json`:
//!
//! ```text
//! [
//!   {
//!     "signature": "heuristic:lockfile",
//!     "fix_name": "install_legacy_peer_deps",
//!     "confidence": 0.85,
//!     "category": "lockfile",
//!     "description": "...",
//!     "success_count": 3,
//!     "failure_count": 0,
//!     "last_used_at": "2026-10-19T08:12:44Z"
//!   }
//! ]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use mend_patterns::{ErrorCategory, ErrorSignature};

use crate::entry::{RepairMemoryEntry, RepairOutcome};
use crate::error::{MemoryError, MemoryResult};

/// Memory file location relative to the project root.
pub const DEFAULT_MEMORY_FILE: &str = ".mend/repair-memory.json";

/// Evidence store keyed by error signature.
///
/// At most one entry exists per signature.
pub trait RepairMemory: Send + Sync {
    fn lookup(&self, signature: &ErrorSignature) -> MemoryResult<Option<RepairMemoryEntry>>;

    /// Create or update the entry for `signature` and return it. Counts
    /// always belong to the entry's `fix_name`: a failing different fix is
    /// ignored, a succeeding one takes the entry over with a fresh record.
    fn record(
        &self,
        signature: &ErrorSignature,
        fix_name: &str,
        confidence: f64,
        category: ErrorCategory,
        description: &str,
        outcome: RepairOutcome,
    ) -> MemoryResult<RepairMemoryEntry>;

    /// All entries, sorted by signature.
    fn entries(&self) -> MemoryResult<Vec<RepairMemoryEntry>>;
}

type EntryMap = BTreeMap<ErrorSignature, RepairMemoryEntry>;

fn upsert(
    map: &mut EntryMap,
    signature: &ErrorSignature,
    fix_name: &str,
    confidence: f64,
    category: ErrorCategory,
    description: &str,
    outcome: RepairOutcome,
) -> MemoryResult<RepairMemoryEntry> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(MemoryError::InvalidConfidence(confidence));
    }
    let entry = map.entry(signature.clone()).or_insert_with(|| {
        RepairMemoryEntry::new(signature.clone(), fix_name, confidence, category, description)
    });
    entry.apply(fix_name, confidence, category, description, outcome);
    Ok(entry.clone())
}

/// Volatile store for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct InMemoryRepairMemory {
    entries: RwLock<EntryMap>,
}

impl InMemoryRepairMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate an entry.
    pub fn with_entry(self, entry: RepairMemoryEntry) -> Self {
        self.entries.write().insert(entry.signature.clone(), entry);
        self
    }
}

impl RepairMemory for InMemoryRepairMemory {
    fn lookup(&self, signature: &ErrorSignature) -> MemoryResult<Option<RepairMemoryEntry>> {
        Ok(self.entries.read().get(signature).cloned())
    }

    fn record(
        &self,
        signature: &ErrorSignature,
        fix_name: &str,
        confidence: f64,
        category: ErrorCategory,
        description: &str,
        outcome: RepairOutcome,
    ) -> MemoryResult<RepairMemoryEntry> {
        let mut entries = self.entries.write();
        upsert(&mut entries, signature, fix_name, confidence, category, description, outcome)
    }

    fn entries(&self) -> MemoryResult<Vec<RepairMemoryEntry>> {
        Ok(self.entries.read().values().cloned().collect())
    }
}

/// JSON-file backed store.
///
/// The whole file is loaded on open and rewritten atomically on every
/// record. The write lock is held across the rewrite so writers are
/// serialized.
#[derive(Debug)]
pub struct FileRepairMemory {
    path: PathBuf,
    entries: RwLock<EntryMap>,
}

impl FileRepairMemory {
    /// Open the store at `path`. A missing file is an empty store; an
    /// unparseable one is an error.
    pub fn open(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = Self::load(&path)?;
        debug!("Loaded {} repair memory entries from {}", entries.len(), path.display());
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Open the default store for a project directory.
    pub fn for_project(project_root: impl AsRef<Path>) -> MemoryResult<Self> {
        Self::open(project_root.as_ref().join(DEFAULT_MEMORY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> MemoryResult<EntryMap> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(EntryMap::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(EntryMap::new());
        }

        let list: Vec<RepairMemoryEntry> =
            serde_json::from_str(&content).map_err(|source| MemoryError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;

        let mut map = EntryMap::new();
        for entry in list {
            if map.contains_key(&entry.signature) {
                warn!("Duplicate repair memory entry for {}, keeping the later one", entry.signature);
            }
            map.insert(entry.signature.clone(), entry);
        }
        Ok(map)
    }

    /// Write temp file then rename over the target.
    fn persist(&self, entries: &EntryMap) -> MemoryResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let list: Vec<&RepairMemoryEntry> = entries.values().collect();
        let content = serde_json::to_string_pretty(&list)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl RepairMemory for FileRepairMemory {
    fn lookup(&self, signature: &ErrorSignature) -> MemoryResult<Option<RepairMemoryEntry>> {
        Ok(self.entries.read().get(signature).cloned())
    }

    fn record(
        &self,
        signature: &ErrorSignature,
        fix_name: &str,
        confidence: f64,
        category: ErrorCategory,
        description: &str,
        outcome: RepairOutcome,
    ) -> MemoryResult<RepairMemoryEntry> {
        let mut entries = self.entries.write();
        let mut updated = entries.clone();
        let entry = upsert(&mut updated, signature, fix_name, confidence, category, description, outcome)?;
        // Only adopt the new state once it is on disk.
        self.persist(&updated)?;
        *entries = updated;

        info!(
            "Recorded {:?} for {} via {} (success rate {:.2})",
            outcome,
            signature,
            fix_name,
            entry.success_rate()
        );
        Ok(entry)
    }

    fn entries(&self) -> MemoryResult<Vec<RepairMemoryEntry>> {
        Ok(self.entries.read().values().cloned().collect())
    }
}
