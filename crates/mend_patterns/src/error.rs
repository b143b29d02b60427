//! Error types for pattern registration and fix parsing.

use thiserror::Error;

/// Result type alias for pattern operations.
pub type PatternResult<T> = Result<T, PatternError>;

/// Errors raised while building the registry or parsing catalog names.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("Invalid pattern regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("Pattern '{key}' has no candidate fixes")]
    EmptyFixes { key: String },

    #[error("Pattern '{key}' fix '{fix}' has confidence {confidence} outside [0, 1]")]
    InvalidConfidence {
        key: String,
        fix: String,
        confidence: f64,
    },

    #[error("Pattern key already registered: {0}")]
    DuplicateKey(String),

    #[error("Unknown fix: {0}")]
    UnknownFix(String),

    #[error("Unknown error category: {0}")]
    UnknownCategory(String),
}
