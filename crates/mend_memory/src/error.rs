//! Error types for the repair memory store.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Repair memory file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Confidence {0} outside [0, 1]")]
    InvalidConfidence(f64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
