//! Error categories and signatures.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PatternError;

/// Broad class of a build failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Type-checker / compiler diagnostics
    Typescript,
    /// Dependency resolution and lockfile state
    Lockfile,
    /// Missing or broken installed packages
    Dependency,
    /// Container build tool and daemon
    Container,
    /// Native addon compilation
    Native,
    Permission,
    Network,
    /// Host resources: memory, ports
    Resource,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Typescript => "typescript",
            Self::Lockfile => "lockfile",
            Self::Dependency => "dependency",
            Self::Container => "container",
            Self::Native => "native",
            Self::Permission => "permission",
            Self::Network => "network",
            Self::Resource => "resource",
        }
    }

    pub fn all() -> [ErrorCategory; 8] {
        [
            Self::Typescript,
            Self::Lockfile,
            Self::Dependency,
            Self::Container,
            Self::Native,
            Self::Permission,
            Self::Network,
            Self::Resource,
        ]
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|c| c.as_str() == s.to_lowercase())
            .ok_or_else(|| PatternError::UnknownCategory(s.to_string()))
    }
}

/// Canonical key identifying a class of observed failure.
///
/// Explicit matches are keyed `<category>:<pattern key>`, heuristic
/// diagnoses `heuristic:<category>`. The key deliberately ignores captured
/// parameters so evidence accumulates per failure mode rather than per
/// package name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorSignature(String);

impl ErrorSignature {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn for_pattern(category: ErrorCategory, key: &str) -> Self {
        Self(format!("{}:{}", category, key))
    }

    pub fn heuristic(category: ErrorCategory) -> Self {
        Self(format!("heuristic:{}", category))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_heuristic(&self) -> bool {
        self.0.starts_with("heuristic:")
    }
}

impl std::fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ErrorSignature {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
