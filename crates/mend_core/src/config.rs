//! Pipeline configuration.
//!
//! Loaded from `<project>/mend.toml` when present. Every field has a
//! default, so an absent or partial file is fine:
//!
//! ```toml
//! build_command = "npm run build"
//! launch_command = "docker compose up -d"
//! max_retries = 3
//! # below max_retries to escalate a stuck signature early
//! max_attempts_per_signature = 2
//! health_urls = ["http://localhost:3000/health"]
//! expected_services = 2
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use mend_runner::{compose_project_name, CommandSpec, ContainerScope};

use crate::error::{CoreError, CoreResult};

/// Config file name at the project root.
pub const CONFIG_FILE: &str = "mend.toml";

/// Directory for memory, logs and events, relative to the project root.
pub const STATE_DIR: &str = ".mend";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub build_command: String,
    pub launch_command: String,
    /// Upper bound on remediation attempts in BuildRetry
    pub max_retries: u32,
    /// Attempts allowed against one signature before escalating with
    /// `SignatureRepeated`. Only takes effect below `max_retries`: on the
    /// last allowed attempt `RetriesExhausted` wins, so with the defaults
    /// (3 and 3) a persistent signature ends as `RetriesExhausted`.
    pub max_attempts_per_signature: u32,
    pub fix_timeout_secs: u64,
    pub build_timeout_secs: u64,
    /// Memory fixes with a success rate above this are tried first
    pub memory_threshold: f64,
    pub settle_delay_secs: u64,
    pub health_urls: Vec<String>,
    pub health_timeout_secs: u64,
    pub expected_services: Option<usize>,
    /// Compose project whose containers are checked; defaults to the name
    /// `docker compose` derives from the project directory
    pub compose_project: Option<String>,
    /// Check every container on the daemon instead of one compose project
    pub scan_all_containers: bool,
    pub skip_preflight: bool,
    pub skip_lockcheck: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            build_command: "npm run build".to_string(),
            launch_command: "docker compose up -d".to_string(),
            max_retries: 3,
            max_attempts_per_signature: 3,
            fix_timeout_secs: 120,
            build_timeout_secs: 900,
            memory_threshold: 0.5,
            settle_delay_secs: 10,
            health_urls: Vec::new(),
            health_timeout_secs: 30,
            expected_services: None,
            compose_project: None,
            scan_all_containers: false,
            skip_preflight: false,
            skip_lockcheck: false,
        }
    }
}

impl PipelineConfig {
    /// Load `mend.toml` from the project root, or defaults if absent.
    pub fn load(project_root: &Path) -> CoreResult<Self> {
        let path = project_root.join(CONFIG_FILE);
        if !path.exists() {
            debug!("No {} in {}, using defaults", CONFIG_FILE, project_root.display());
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.max_retries < 1 {
            return Err(CoreError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.max_attempts_per_signature < 1 {
            return Err(CoreError::InvalidConfig(
                "max_attempts_per_signature must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.memory_threshold) {
            return Err(CoreError::InvalidConfig(format!(
                "memory_threshold {} outside [0, 1]",
                self.memory_threshold
            )));
        }
        if self.build_command.trim().is_empty() {
            return Err(CoreError::InvalidConfig("build_command is empty".to_string()));
        }
        if self.launch_command.trim().is_empty() {
            return Err(CoreError::InvalidConfig("launch_command is empty".to_string()));
        }
        for url in &self.health_urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(CoreError::InvalidConfig(format!(
                    "health url must be http(s): {}",
                    url
                )));
            }
        }
        Ok(())
    }

    pub fn build_spec(&self, project_root: &Path) -> CoreResult<CommandSpec> {
        Ok(CommandSpec::parse(&self.build_command)?.workdir(project_root))
    }

    pub fn launch_spec(&self, project_root: &Path) -> CoreResult<CommandSpec> {
        Ok(CommandSpec::parse(&self.launch_command)?.workdir(project_root))
    }

    /// Containers health verification counts, or `None` when no compose
    /// project name can be derived from the project directory.
    pub fn container_scope(&self, project_root: &Path) -> Option<ContainerScope> {
        if self.scan_all_containers {
            return Some(ContainerScope::All);
        }
        if let Some(project) = &self.compose_project {
            return Some(ContainerScope::Project(project.clone()));
        }
        let root = project_root
            .canonicalize()
            .unwrap_or_else(|_| project_root.to_path_buf());
        root.file_name()
            .and_then(|name| compose_project_name(&name.to_string_lossy()))
            .map(ContainerScope::Project)
    }
}

/// `<project>/.mend`
pub fn state_dir(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.fix_timeout_secs, 120);
        assert_eq!(config.memory_threshold, 0.5);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig::load(temp.path()).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE),
            "build_command = \"pnpm build\"\nmax_retries = 5\nhealth_urls = [\"http://localhost:8080/health\"]\n",
        )
        .unwrap();

        let config = PipelineConfig::load(temp.path()).unwrap();
        assert_eq!(config.build_command, "pnpm build");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.health_urls.len(), 1);
        assert_eq!(config.build_timeout_secs, 900);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE), "max_retries = \"many\"").unwrap();
        assert!(matches!(
            PipelineConfig::load(temp.path()),
            Err(CoreError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let zero = PipelineConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let threshold = PipelineConfig {
            memory_threshold: 1.5,
            ..Default::default()
        };
        assert!(threshold.validate().is_err());

        let empty = PipelineConfig {
            build_command: "  ".to_string(),
            ..Default::default()
        };
        assert!(empty.validate().is_err());

        let url = PipelineConfig {
            health_urls: vec!["localhost:3000".to_string()],
            ..Default::default()
        };
        assert!(url.validate().is_err());
    }

    #[test]
    fn test_container_scope_defaults_to_directory_project() {
        let config = PipelineConfig::default();
        assert_eq!(
            config.container_scope(Path::new("/srv/Shop API")),
            Some(ContainerScope::Project("shopapi".to_string()))
        );
        assert_eq!(config.container_scope(Path::new("/")), None);

        let named = PipelineConfig {
            compose_project: Some("storefront".to_string()),
            ..Default::default()
        };
        assert_eq!(
            named.container_scope(Path::new("/srv/app")),
            Some(ContainerScope::Project("storefront".to_string()))
        );

        let everything = PipelineConfig {
            scan_all_containers: true,
            compose_project: Some("storefront".to_string()),
            ..Default::default()
        };
        assert_eq!(
            everything.container_scope(Path::new("/srv/app")),
            Some(ContainerScope::All)
        );
    }

    #[test]
    fn test_build_spec_runs_in_project() {
        let config = PipelineConfig::default();
        let spec = config.build_spec(Path::new("/srv/app")).unwrap();
        assert_eq!(spec.program, "npm");
        assert_eq!(spec.args, vec!["run", "build"]);
        assert_eq!(spec.workdir.as_deref(), Some(Path::new("/srv/app")));
    }
}
