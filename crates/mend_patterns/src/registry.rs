//! Error pattern registry.
//!
//! Patterns are evaluated in registration order and the first pattern that
//! matches a line wins. Classification is pure: it takes build output and
//! returns owned [`ClassifiedError`] values with no side effects.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{CandidateFix, FixKind, MatchGroups};
use crate::error::{PatternError, PatternResult};
use crate::signature::{ErrorCategory, ErrorSignature};

/// How a pattern recognizes a line.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Case-insensitive substring. Stored lowercased.
    Literal(String),
    Regex(Regex),
}

impl Matcher {
    pub fn literal(text: &str) -> Self {
        Self::Literal(text.to_lowercase())
    }

    pub fn regex(expr: &str) -> PatternResult<Self> {
        Ok(Self::Regex(Regex::new(expr)?))
    }

    /// Try this matcher against one line, returning the captured groups.
    pub fn captures(&self, line: &str) -> Option<MatchGroups> {
        match self {
            Self::Literal(needle) => {
                let lower = line.to_lowercase();
                let start = lower.find(needle.as_str())?;
                // Lowercasing can change byte lengths for non-ASCII text.
                let matched = line
                    .get(start..start + needle.len())
                    .unwrap_or(needle.as_str())
                    .to_string();
                Some(MatchGroups::new(vec![Some(matched)]))
            }
            Self::Regex(re) => {
                let caps = re.captures(line)?;
                Some(MatchGroups::new(
                    caps.iter()
                        .map(|m| m.map(|m| m.as_str().to_string()))
                        .collect(),
                ))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Literal(text) => format!("literal \"{}\"", text),
            Self::Regex(re) => format!("regex /{}/", re.as_str()),
        }
    }
}

/// A recognized failure mode and the fixes that address it.
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    pub key: String,
    pub category: ErrorCategory,
    pub matcher: Matcher,
    /// Kept sorted by descending confidence once registered.
    pub fixes: Vec<CandidateFix>,
}

impl ErrorPattern {
    pub fn new(key: impl Into<String>, category: ErrorCategory, matcher: Matcher) -> Self {
        Self {
            key: key.into(),
            category,
            matcher,
            fixes: Vec::new(),
        }
    }

    pub fn literal(key: impl Into<String>, category: ErrorCategory, text: &str) -> Self {
        Self::new(key, category, Matcher::literal(text))
    }

    pub fn regex(
        key: impl Into<String>,
        category: ErrorCategory,
        expr: &str,
    ) -> PatternResult<Self> {
        Ok(Self::new(key, category, Matcher::regex(expr)?))
    }

    pub fn fix(mut self, fix: FixKind, confidence: f64, description: &str) -> Self {
        self.fixes.push(CandidateFix::new(fix, confidence, description));
        self
    }

    pub fn signature(&self) -> ErrorSignature {
        ErrorSignature::for_pattern(self.category, &self.key)
    }

    fn validate(&self) -> PatternResult<()> {
        if self.fixes.is_empty() {
            return Err(PatternError::EmptyFixes {
                key: self.key.clone(),
            });
        }
        for candidate in &self.fixes {
            if !(0.0..=1.0).contains(&candidate.confidence) {
                return Err(PatternError::InvalidConfidence {
                    key: self.key.clone(),
                    fix: candidate.fix.to_string(),
                    confidence: candidate.confidence,
                });
            }
        }
        Ok(())
    }
}

/// One pattern hit on one line.
#[derive(Debug, Clone)]
pub struct PatternMatch<'a> {
    pub pattern: &'a ErrorPattern,
    pub groups: MatchGroups,
}

impl PatternMatch<'_> {
    pub fn key(&self) -> &str {
        &self.pattern.key
    }

    pub fn category(&self) -> ErrorCategory {
        self.pattern.category
    }

    pub fn fixes(&self) -> &[CandidateFix] {
        &self.pattern.fixes
    }

    /// The matched text.
    pub fn matched(&self) -> &str {
        self.groups.get(0).unwrap_or_default()
    }
}

/// An error found in build output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub signature: ErrorSignature,
    pub key: String,
    pub category: ErrorCategory,
    /// 1-based line number in the scanned output.
    pub line_number: usize,
    pub line: String,
    pub groups: MatchGroups,
    pub fixes: Vec<CandidateFix>,
}

impl ClassifiedError {
    fn from_match(m: PatternMatch<'_>, line_number: usize, line: &str) -> Self {
        Self {
            signature: m.pattern.signature(),
            key: m.pattern.key.clone(),
            category: m.pattern.category,
            line_number,
            line: line.trim().to_string(),
            groups: m.groups,
            fixes: m.pattern.fixes.clone(),
        }
    }

    /// Top-ranked static fix description with groups substituted.
    pub fn summary(&self) -> String {
        self.fixes
            .first()
            .map(|f| f.describe(&self.groups))
            .unwrap_or_else(|| self.line.clone())
    }
}

/// Ordered collection of error patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    patterns: Vec<ErrorPattern>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern after validating it.
    ///
    /// Registration order is match priority.
    pub fn register(&mut self, mut pattern: ErrorPattern) -> PatternResult<()> {
        pattern.validate()?;
        if self.get(&pattern.key).is_some() {
            return Err(PatternError::DuplicateKey(pattern.key));
        }
        pattern
            .fixes
            .sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        debug!("Registered pattern {} ({})", pattern.key, pattern.matcher.describe());
        self.patterns.push(pattern);
        Ok(())
    }

    pub fn with(mut self, pattern: ErrorPattern) -> PatternResult<Self> {
        self.register(pattern)?;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&ErrorPattern> {
        self.patterns.iter().find(|p| p.key == key)
    }

    pub fn patterns(&self) -> &[ErrorPattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// First registered pattern matching `line`.
    pub fn match_line(&self, line: &str) -> Option<PatternMatch<'_>> {
        if line.trim().is_empty() {
            return None;
        }
        self.patterns.iter().find_map(|pattern| {
            pattern
                .matcher
                .captures(line)
                .map(|groups| PatternMatch { pattern, groups })
        })
    }

    /// Scan output line by line.
    ///
    /// Results are in output order, de-duplicated by signature plus the
    /// primary capture, so the same missing module reported on ten lines
    /// yields one entry while two different missing modules yield two.
    pub fn classify(&self, output: &str) -> Vec<ClassifiedError> {
        let mut seen = HashSet::new();
        let mut errors = Vec::new();

        for (index, line) in output.lines().enumerate() {
            let Some(m) = self.match_line(line) else {
                continue;
            };
            let dedup_key = (
                m.pattern.key.clone(),
                m.groups.get(1).map(str::to_string),
            );
            if seen.insert(dedup_key) {
                errors.push(ClassifiedError::from_match(m, index + 1, line));
            }
        }

        debug!("Classified {} distinct errors", errors.len());
        errors
    }

    /// Registry with the built-in patterns for Node, TypeScript and Docker
    /// builds.
    pub fn builtin() -> PatternResult<Self> {
        use ErrorCategory::*;
        use FixKind::*;

        Self::new()
            // TypeScript. Specific codes before the catch-all.
            .with(
                ErrorPattern::regex(
                    "ts_cannot_find_module",
                    Typescript,
                    r"error TS2307: Cannot find module '([^']+)'",
                )?
                .fix(InstallMissingPackage { group: 1 }, 0.8, "Install missing package {1}")
                .fix(InstallTypeDefinitions { group: 1 }, 0.6, "Install type definitions for {1}")
                .fix(ReinstallDependencies, 0.5, "Reinstall dependencies"),
            )?
            .with(
                ErrorPattern::regex(
                    "ts_missing_declaration",
                    Typescript,
                    r"error TS7016: Could not find a declaration file for module '([^']+)'",
                )?
                .fix(InstallTypeDefinitions { group: 1 }, 0.9, "Install type definitions for {1}"),
            )?
            .with(
                ErrorPattern::regex("ts_type_error", Typescript, r"error (TS\d{4}):")?
                    .fix(FixTypeErrors, 0.9, "Fix {1} type errors in source")
                    .fix(CleanTypescriptBuild, 0.3, "Clean incremental TypeScript build output"),
            )?
            // Package manager.
            .with(
                ErrorPattern::regex(
                    "npm_lockfile_out_of_sync",
                    Lockfile,
                    r"(?i)package\.json and package-lock\.json.* are (?:not )?in sync",
                )?
                .fix(RegenerateLockfile, 0.9, "Regenerate package-lock.json")
                .fix(ReinstallDependencies, 0.6, "Reinstall dependencies"),
            )?
            .with(
                ErrorPattern::literal(
                    "npm_missing_lockfile",
                    Lockfile,
                    "can only install with an existing package-lock.json",
                )
                .fix(RegenerateLockfile, 0.9, "Generate package-lock.json"),
            )?
            .with(
                ErrorPattern::regex(
                    "node_module_not_found",
                    Dependency,
                    r"Cannot find module '([^'./][^']*)'",
                )?
                .fix(InstallMissingPackage { group: 1 }, 0.85, "Install missing package {1}")
                .fix(ReinstallDependencies, 0.7, "Reinstall dependencies"),
            )?
            .with(
                ErrorPattern::regex(
                    "bundler_cannot_resolve",
                    Dependency,
                    r"Module not found: Error: Can't resolve '([^'./][^']*)'",
                )?
                .fix(InstallMissingPackage { group: 1 }, 0.85, "Install missing package {1}")
                .fix(ReinstallDependencies, 0.6, "Reinstall dependencies"),
            )?
            .with(
                ErrorPattern::literal("npm_integrity_mismatch", Dependency, "EINTEGRITY")
                    .fix(VerifyPackageCache, 0.8, "Verify npm cache")
                    .fix(ReinstallDependencies, 0.6, "Reinstall dependencies"),
            )?
            .with(
                ErrorPattern::regex(
                    "npm_network_failure",
                    Network,
                    r"npm ERR! code (ETIMEDOUT|ECONNRESET|ENOTFOUND|EAI_AGAIN)",
                )?
                .fix(VerifyPackageCache, 0.6, "Verify npm cache after {1}")
                .fix(ReinstallDependencies, 0.5, "Retry dependency install after {1}"),
            )?
            // Native addons.
            .with(
                ErrorPattern::regex(
                    "native_binding_mismatch",
                    Native,
                    r"was compiled against a different Node\.js version",
                )?
                .fix(RebuildNativeModules, 0.9, "Rebuild native modules for current Node.js"),
            )?
            .with(
                ErrorPattern::regex("native_gyp_failure", Native, r"(?i)gyp ERR! (?:build error|stack)")?
                    .fix(RebuildNativeModules, 0.8, "Rebuild native modules"),
            )?
            .with(
                ErrorPattern::regex(
                    "permission_denied",
                    Permission,
                    r"(?:npm ERR! code EACCES|EACCES: permission denied)",
                )?
                .fix(FixPermissions, 0.9, "Fix ownership of project and cache directories"),
            )?
            // Container build and runtime.
            .with(
                ErrorPattern::literal("docker_no_space", Container, "no space left on device")
                    .fix(DockerPrune, 0.95, "Prune unused Docker data")
                    .fix(DockerBuilderPrune, 0.8, "Prune Docker build cache"),
            )?
            .with(
                ErrorPattern::regex(
                    "docker_base_image_unavailable",
                    Container,
                    r"failed to resolve source metadata for ([A-Za-z0-9][A-Za-z0-9._/:@-]*)",
                )?
                .fix(PullBaseImage { group: 1 }, 0.7, "Pull base image {1}")
                .fix(DockerBuilderPrune, 0.4, "Prune Docker build cache"),
            )?
            .with(
                ErrorPattern::literal("docker_cache_key", Container, "failed to compute cache key")
                    .fix(DockerBuilderPrune, 0.75, "Prune Docker build cache"),
            )?
            .with(
                ErrorPattern::literal(
                    "docker_daemon_unreachable",
                    Container,
                    "Cannot connect to the Docker daemon",
                )
                .fix(StartContainerRuntime, 0.9, "Start the Docker daemon"),
            )?
            // Host resources.
            .with(
                ErrorPattern::literal("node_heap_exhausted", Resource, "JavaScript heap out of memory")
                    .fix(IncreaseMemoryLimit, 0.9, "Raise --max-old-space-size for the build"),
            )?
            .with(
                ErrorPattern::regex(
                    "port_in_use",
                    Resource,
                    r"(?:EADDRINUSE|address already in use)(?:.*?:(\d{2,5})\b)?",
                )?
                .fix(FreePort, 0.9, "Free port {1}"),
            )
    }
}
