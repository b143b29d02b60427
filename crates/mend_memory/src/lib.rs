//! # mend_memory
//!
//! Empirical record of which fixes cleared which error signatures.
//!
//! The orchestrator consults this before its static fix ranking: a fix with
//! a good track record for a signature is tried first. Evidence is kept per
//! signature and survives process restarts when backed by
//! [`FileRepairMemory`].

pub mod entry;
pub mod error;
pub mod store;

pub use entry::{RepairMemoryEntry, RepairOutcome};
pub use error::{MemoryError, MemoryResult};
pub use store::{FileRepairMemory, InMemoryRepairMemory, RepairMemory, DEFAULT_MEMORY_FILE};
