//! Error types for the core module.

use thiserror::Error;

use crate::phase::PipelinePhase;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur during core operations.
///
/// Diagnosis and remediation failures are not errors; they end up in the
/// pipeline report. These are the conditions that make a run impossible.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition {
        from: PipelinePhase,
        to: PipelinePhase,
    },

    #[error("Runner error: {0}")]
    Runner(#[from] mend_runner::RunnerError),

    #[error("Pattern error: {0}")]
    Pattern(#[from] mend_patterns::PatternError),

    #[error("Repair memory error: {0}")]
    Memory(#[from] mend_memory::MemoryError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
