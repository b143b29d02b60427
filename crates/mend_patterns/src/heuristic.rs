//! Heuristic fallback diagnosis.
//!
//! Used only when no registered pattern matches. Rules are keyword
//! predicates over the whole output, checked in priority order; the first
//! rule that fires produces the diagnosis.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::FixKind;
use crate::signature::{ErrorCategory, ErrorSignature};

/// Best-effort explanation of unrecognized output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub category: ErrorCategory,
    pub message: String,
    pub suggested_fix: FixKind,
    pub confidence: f64,
}

impl Diagnosis {
    pub fn signature(&self) -> ErrorSignature {
        ErrorSignature::heuristic(self.category)
    }
}

/// A keyword rule. The predicate receives lowercased output.
#[derive(Debug, Clone)]
pub struct HeuristicRule {
    pub name: &'static str,
    pub category: ErrorCategory,
    pub message: &'static str,
    pub fix: FixKind,
    pub confidence: f64,
    keywords: &'static [&'static str],
}

impl HeuristicRule {
    pub fn keywords(&self) -> &'static [&'static str] {
        self.keywords
    }

    pub fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| lowered.contains(k))
    }

    pub fn diagnosis(&self) -> Diagnosis {
        Diagnosis {
            category: self.category,
            message: self.message.to_string(),
            suggested_fix: self.fix,
            confidence: self.confidence,
        }
    }
}

const RULES: &[HeuristicRule] = &[
    HeuristicRule {
        name: "dependency_conflict",
        category: ErrorCategory::Lockfile,
        message: "Dependency tree conflict; retry install with legacy peer resolution",
        fix: FixKind::InstallLegacyPeerDeps,
        confidence: 0.85,
        keywords: &[
            "eresolve",
            "unable to resolve dependency tree",
            "could not resolve dependency",
            "conflicting peer dependency",
        ],
    },
    HeuristicRule {
        name: "typescript_errors",
        category: ErrorCategory::Typescript,
        message: "TypeScript compilation failed; clean incremental build state",
        fix: FixKind::CleanTypescriptBuild,
        confidence: 0.60,
        keywords: &["error ts", "is not assignable to type", "tsconfig", "tsc exited"],
    },
    HeuristicRule {
        name: "disk_exhausted",
        category: ErrorCategory::Container,
        message: "Disk space exhausted; prune unused container data",
        fix: FixKind::DockerPrune,
        confidence: 0.95,
        keywords: &["no space left on device", "enospc", "disk quota exceeded"],
    },
    HeuristicRule {
        name: "native_build",
        category: ErrorCategory::Native,
        message: "Native addon failed to build; rebuild native modules",
        fix: FixKind::RebuildNativeModules,
        confidence: 0.75,
        keywords: &["node-gyp", "gyp err!", "make: ***", "prebuild-install", "node_module_version"],
    },
    HeuristicRule {
        name: "permissions",
        category: ErrorCategory::Permission,
        message: "Permission denied; fix file ownership manually",
        fix: FixKind::FixPermissions,
        confidence: 0.70,
        keywords: &["eacces", "eperm", "permission denied", "operation not permitted"],
    },
    HeuristicRule {
        name: "network",
        category: ErrorCategory::Network,
        message: "Network failure while fetching packages; verify package cache",
        fix: FixKind::VerifyPackageCache,
        confidence: 0.65,
        keywords: &[
            "etimedout",
            "econnreset",
            "econnrefused",
            "enotfound",
            "eai_again",
            "socket hang up",
            "network timeout",
        ],
    },
];

/// Ordered keyword rules.
#[derive(Debug, Clone)]
pub struct HeuristicDiagnoser {
    rules: Vec<HeuristicRule>,
}

impl Default for HeuristicDiagnoser {
    fn default() -> Self {
        Self {
            rules: RULES.to_vec(),
        }
    }
}

impl HeuristicDiagnoser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[HeuristicRule] {
        &self.rules
    }

    pub fn diagnose(&self, output: &str) -> Option<Diagnosis> {
        let lowered = output.to_lowercase();
        let rule = self.rules.iter().find(|r| r.matches(&lowered))?;
        debug!("Heuristic rule {} matched", rule.name);
        Some(rule.diagnosis())
    }
}

/// Diagnose with the default rule table.
pub fn diagnose(output: &str) -> Option<Diagnosis> {
    HeuristicDiagnoser::default().diagnose(output)
}
