//! PreFlight checks.
//!
//! Cheap, deterministic inspections of the project tree that run before any
//! build. A failure here will not go away by retrying, so the pipeline
//! escalates straight away and never remediates.
//!
//! Each check only inspects files that exist; a project without a compose
//! file passes the compose check.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: String,
    pub passed: bool,
    pub message: String,
}

impl CheckResult {
    pub fn pass(check: &str, message: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            passed: true,
            message: message.into(),
        }
    }

    pub fn fail(check: &str, message: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            passed: false,
            message: message.into(),
        }
    }
}

/// A static project check.
pub trait PreflightCheck: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn check(&self, project_root: &Path) -> CheckResult;
}

/// Checks for a config, honoring `skip_lockcheck`.
pub fn default_checks(config: &PipelineConfig) -> Vec<Box<dyn PreflightCheck>> {
    let mut checks: Vec<Box<dyn PreflightCheck>> = Vec::new();
    if !config.skip_lockcheck {
        checks.push(Box::new(LockfileFreshnessCheck));
    }
    checks.push(Box::new(PackageManifestCheck));
    checks.push(Box::new(ComposeFileCheck));
    checks.push(Box::new(DockerfileCheck));
    checks
}

const MANIFEST: &str = "package.json";
const LOCKFILES: &[&str] = &[
    "package-lock.json",
    "npm-shrinkwrap.json",
    "yarn.lock",
    "pnpm-lock.yaml",
];
const COMPOSE_FILES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// A lockfile exists next to the manifest and is not older than it.
pub struct LockfileFreshnessCheck;

impl PreflightCheck for LockfileFreshnessCheck {
    fn name(&self) -> &str {
        "lockfile-freshness"
    }

    fn description(&self) -> &str {
        "Dependency lockfile exists and is newer than package.json"
    }

    fn check(&self, project_root: &Path) -> CheckResult {
        let manifest = project_root.join(MANIFEST);
        if !manifest.exists() {
            return CheckResult::pass(self.name(), "no package.json");
        }

        let Some(lockfile) = LOCKFILES
            .iter()
            .map(|name| project_root.join(name))
            .find(|path| path.exists())
        else {
            return CheckResult::fail(self.name(), "package.json has no lockfile");
        };

        let modified = |path: &Path| fs::metadata(path).and_then(|m| m.modified());
        match (modified(&manifest), modified(&lockfile)) {
            (Ok(manifest_time), Ok(lock_time)) if lock_time < manifest_time => CheckResult::fail(
                self.name(),
                format!(
                    "{} is older than package.json; regenerate it",
                    lockfile.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
                ),
            ),
            (Ok(_), Ok(_)) => CheckResult::pass(self.name(), "lockfile is current"),
            (Err(e), _) | (_, Err(e)) => {
                CheckResult::fail(self.name(), format!("cannot read timestamps: {}", e))
            }
        }
    }
}

/// `package.json` parses as a JSON object.
pub struct PackageManifestCheck;

impl PreflightCheck for PackageManifestCheck {
    fn name(&self) -> &str {
        "package-manifest"
    }

    fn description(&self) -> &str {
        "package.json is valid JSON"
    }

    fn check(&self, project_root: &Path) -> CheckResult {
        let path = project_root.join(MANIFEST);
        if !path.exists() {
            return CheckResult::pass(self.name(), "no package.json");
        }
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => return CheckResult::fail(self.name(), format!("cannot read package.json: {}", e)),
        };
        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(value) if value.is_object() => CheckResult::pass(self.name(), "package.json is valid"),
            Ok(_) => CheckResult::fail(self.name(), "package.json is not a JSON object"),
            Err(e) => CheckResult::fail(self.name(), format!("package.json is invalid: {}", e)),
        }
    }
}

/// Compose files parse as YAML mappings.
pub struct ComposeFileCheck;

impl PreflightCheck for ComposeFileCheck {
    fn name(&self) -> &str {
        "compose-file"
    }

    fn description(&self) -> &str {
        "Compose files are valid YAML"
    }

    fn check(&self, project_root: &Path) -> CheckResult {
        let mut checked = 0;
        for name in COMPOSE_FILES {
            let path = project_root.join(name);
            if !path.exists() {
                continue;
            }
            checked += 1;
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => return CheckResult::fail(self.name(), format!("cannot read {}: {}", name, e)),
            };
            match serde_yaml::from_str::<serde_yaml::Value>(&content) {
                Ok(serde_yaml::Value::Mapping(_)) => {}
                Ok(_) => return CheckResult::fail(self.name(), format!("{} is not a YAML mapping", name)),
                Err(e) => return CheckResult::fail(self.name(), format!("{} is invalid: {}", name, e)),
            }
        }

        if checked == 0 {
            CheckResult::pass(self.name(), "no compose file")
        } else {
            CheckResult::pass(self.name(), format!("{} compose file(s) valid", checked))
        }
    }
}

/// A Dockerfile declares a base image.
pub struct DockerfileCheck;

impl PreflightCheck for DockerfileCheck {
    fn name(&self) -> &str {
        "dockerfile"
    }

    fn description(&self) -> &str {
        "Dockerfile has a FROM instruction"
    }

    fn check(&self, project_root: &Path) -> CheckResult {
        let path = project_root.join("Dockerfile");
        if !path.exists() {
            return CheckResult::pass(self.name(), "no Dockerfile");
        }
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => return CheckResult::fail(self.name(), format!("cannot read Dockerfile: {}", e)),
        };
        let has_from = content.lines().any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|word| word.eq_ignore_ascii_case("FROM"))
        });
        if has_from {
            CheckResult::pass(self.name(), "Dockerfile declares a base image")
        } else {
            CheckResult::fail(self.name(), "Dockerfile has no FROM instruction")
        }
    }
}
