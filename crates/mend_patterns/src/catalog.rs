//! Fix catalog.
//!
//! The set of remediations Mend knows how to perform is closed: every fix is
//! a [`FixKind`] variant, and a variant either resolves to a concrete
//! [`CommandSpec`] or is a manual fix with no automated command. Variants
//! that need a parameter (a package name, an image reference) carry the
//! index of the capture group it is taken from.

use std::str::FromStr;

use mend_runner::CommandSpec;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PatternError;

/// Captured text from a pattern match. Index 0 is the whole match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchGroups(Vec<Option<String>>);

impl MatchGroups {
    pub fn new(groups: Vec<Option<String>>) -> Self {
        Self(groups)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).and_then(|g| g.as_deref())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Option<String>>> for MatchGroups {
    fn from(groups: Vec<Option<String>>) -> Self {
        Self(groups)
    }
}

/// A named remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixKind {
    /// `npm install --legacy-peer-deps`
    InstallLegacyPeerDeps,
    /// `npm install --package-lock-only`
    RegenerateLockfile,
    /// `npm install`
    ReinstallDependencies,
    /// `npm install <package>`
    InstallMissingPackage { group: usize },
    /// `npm install --save-dev @types/<package>`
    InstallTypeDefinitions { group: usize },
    /// `npx tsc --build --clean`
    CleanTypescriptBuild,
    /// `npm rebuild`
    RebuildNativeModules,
    /// `npm cache verify`
    VerifyPackageCache,
    /// `docker system prune -f`
    DockerPrune,
    /// `docker builder prune -f`
    DockerBuilderPrune,
    /// `docker pull <image>`
    PullBaseImage { group: usize },
    FixTypeErrors,
    FixPermissions,
    FreePort,
    IncreaseMemoryLimit,
    StartContainerRuntime,
}

impl FixKind {
    pub fn all() -> Vec<FixKind> {
        vec![
            Self::InstallLegacyPeerDeps,
            Self::RegenerateLockfile,
            Self::ReinstallDependencies,
            Self::InstallMissingPackage { group: 1 },
            Self::InstallTypeDefinitions { group: 1 },
            Self::CleanTypescriptBuild,
            Self::RebuildNativeModules,
            Self::VerifyPackageCache,
            Self::DockerPrune,
            Self::DockerBuilderPrune,
            Self::PullBaseImage { group: 1 },
            Self::FixTypeErrors,
            Self::FixPermissions,
            Self::FreePort,
            Self::IncreaseMemoryLimit,
            Self::StartContainerRuntime,
        ]
    }

    /// Stable name used in memory records and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InstallLegacyPeerDeps => "install_legacy_peer_deps",
            Self::RegenerateLockfile => "regenerate_lockfile",
            Self::ReinstallDependencies => "reinstall_dependencies",
            Self::InstallMissingPackage { .. } => "install_missing_package",
            Self::InstallTypeDefinitions { .. } => "install_type_definitions",
            Self::CleanTypescriptBuild => "clean_typescript_build",
            Self::RebuildNativeModules => "rebuild_native_modules",
            Self::VerifyPackageCache => "verify_package_cache",
            Self::DockerPrune => "docker_prune",
            Self::DockerBuilderPrune => "docker_builder_prune",
            Self::PullBaseImage { .. } => "pull_base_image",
            Self::FixTypeErrors => "fix_type_errors",
            Self::FixPermissions => "fix_permissions",
            Self::FreePort => "free_port",
            Self::IncreaseMemoryLimit => "increase_memory_limit",
            Self::StartContainerRuntime => "start_container_runtime",
        }
    }

    /// Whether this fix needs a human.
    pub fn is_manual(&self) -> bool {
        matches!(
            self,
            Self::FixTypeErrors
                | Self::FixPermissions
                | Self::FreePort
                | Self::IncreaseMemoryLimit
                | Self::StartContainerRuntime
        )
    }

    /// Resolve to an executable command.
    ///
    /// Returns `None` for manual fixes and when a required parameter is
    /// missing or fails validation. Parameters end up as process arguments,
    /// never shell text, but are still restricted to a conservative
    /// character set.
    pub fn resolve(&self, groups: &MatchGroups) -> Option<CommandSpec> {
        let npm = || CommandSpec::new("npm");
        let docker = || CommandSpec::new("docker");

        match self {
            Self::InstallLegacyPeerDeps => Some(npm().args(["install", "--legacy-peer-deps"])),
            Self::RegenerateLockfile => Some(npm().args(["install", "--package-lock-only"])),
            Self::ReinstallDependencies => Some(npm().arg("install")),
            Self::InstallMissingPackage { group } => {
                let package = package_root(groups.get(*group)?)?;
                Some(npm().arg("install").arg(package))
            }
            Self::InstallTypeDefinitions { group } => {
                let package = package_root(groups.get(*group)?)?;
                Some(npm().args(["install", "--save-dev"]).arg(types_package(&package)))
            }
            Self::CleanTypescriptBuild => {
                Some(CommandSpec::new("npx").args(["tsc", "--build", "--clean"]))
            }
            Self::RebuildNativeModules => Some(npm().arg("rebuild")),
            Self::VerifyPackageCache => Some(npm().args(["cache", "verify"])),
            Self::DockerPrune => Some(docker().args(["system", "prune", "-f"])),
            Self::DockerBuilderPrune => Some(docker().args(["builder", "prune", "-f"])),
            Self::PullBaseImage { group } => {
                let image = groups.get(*group).filter(|i| is_image_reference(i))?;
                Some(docker().arg("pull").arg(image))
            }
            Self::FixTypeErrors
            | Self::FixPermissions
            | Self::FreePort
            | Self::IncreaseMemoryLimit
            | Self::StartContainerRuntime => None,
        }
    }
}

impl std::fmt::Display for FixKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FixKind {
    type Err = PatternError;

    /// Parameterized variants parse with their parameter taken from group 1.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| PatternError::UnknownFix(s.to_string()))
    }
}

impl Serialize for FixKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for FixKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// A fix offered by a pattern, with its confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFix {
    pub fix: FixKind,
    pub confidence: f64,
    /// Human description; `{N}` is replaced with capture group N.
    pub description: String,
}

impl CandidateFix {
    pub fn new(fix: FixKind, confidence: f64, description: impl Into<String>) -> Self {
        Self {
            fix,
            confidence,
            description: description.into(),
        }
    }

    pub fn describe(&self, groups: &MatchGroups) -> String {
        render_description(&self.description, groups)
    }
}

/// Substitute `{N}` placeholders with capture groups.
///
/// Missing groups render as `?`. Braces that do not enclose a group index
/// are copied through unchanged.
pub fn render_description(template: &str, groups: &MatchGroups) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let index = after
            .find('}')
            .and_then(|close| after[..close].parse::<usize>().ok().map(|n| (n, close)));

        match index {
            Some((n, close)) => {
                out.push_str(groups.get(n).unwrap_or("?"));
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Reduce an import specifier to the installable package name.
///
/// `lodash/fp` becomes `lodash`, `@scope/pkg/sub` becomes `@scope/pkg`.
/// Relative and absolute paths are not packages.
fn package_root(specifier: &str) -> Option<String> {
    if specifier.starts_with('.') || specifier.starts_with('/') {
        return None;
    }

    let mut parts = specifier.split('/');
    let first = parts.next()?;
    let root = if first.starts_with('@') {
        format!("{}/{}", first, parts.next()?)
    } else {
        first.to_string()
    };

    is_package_name(&root).then_some(root)
}

fn is_package_name(name: &str) -> bool {
    let bare = match name.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, pkg)) if is_name_part(scope) && is_name_part(pkg) => return true,
            _ => return false,
        },
        None => name,
    };
    is_name_part(bare)
}

fn is_name_part(part: &str) -> bool {
    !part.is_empty()
        && part.len() <= 214
        && !part.starts_with(['.', '_', '-'])
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// `@scope/pkg` types live at `@types/scope__pkg`.
fn types_package(package: &str) -> String {
    match package.strip_prefix('@').and_then(|p| p.split_once('/')) {
        Some((scope, pkg)) => format!("@types/{}__{}", scope, pkg),
        None => format!("@types/{}", package),
    }
}

fn is_image_reference(image: &str) -> bool {
    !image.is_empty()
        && image.len() <= 255
        && image.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && image
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':' | '@'))
}
