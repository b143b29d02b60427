//! CLI command definitions.
//!
//! `run` drives the whole pipeline; `remediate` is the single-shot hook a
//! build script calls after a failed build. The rest are read-only.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tracing::debug;

use mend_core::PipelineConfig;
use mend_memory::FileRepairMemory;
use mend_runner::{CommandRunner, ProcessRunner, ProcessRunnerOptions};

pub mod diagnose;
pub mod memory;
pub mod patterns;
pub mod remediate;
pub mod run;

/// Mend - self-healing build and deploy repair
#[derive(Parser)]
#[command(name = "mend")]
#[command(version, about = "Mend - self-healing build and deploy repair")]
#[command(long_about = r#"
Mend classifies build failures, applies known fixes, verifies them with a
rebuild and remembers what worked.

COMMANDS:
  run        → PreFlight, build with repair, launch, health verification
  remediate  → Classify one build log and apply the best fix once
  diagnose   → Classify a build log without side effects
  patterns   → List known error patterns and heuristic rules
  memory     → Inspect repair memory

EXIT CODES:
  0 - Success (pipeline green, or a fix was applied)
  1 - Escalated, or nothing could be remediated
  2 - Invalid arguments or configuration
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project root
    #[arg(short, long, global = true, default_value = ".")]
    pub project: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline
    Run(run::RunArgs),

    /// Apply the best fix for a failed build's output
    Remediate(remediate::RemediateArgs),

    /// Classify build output and show ranked fixes
    Diagnose(diagnose::DiagnoseArgs),

    /// List the pattern registry and heuristic rules
    Patterns(patterns::PatternsArgs),

    /// Inspect repair memory
    Memory(memory::MemoryArgs),
}

impl Commands {
    /// Whether the command writes under the project's state directory.
    pub fn writes_state(&self) -> bool {
        matches!(self, Self::Run(_) | Self::Remediate(_))
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Project not found: {0}")]
    ProjectNotFound(PathBuf),

    #[error("Build output not found: {0}")]
    OutputNotFound(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Options shared by commands that load configuration and memory.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Configuration file (defaults to <project>/mend.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Repair memory file (defaults to <project>/.mend/repair-memory.json)
    #[arg(long, env = "MEND_MEMORY")]
    pub memory: Option<PathBuf>,

    /// Maximum remediation attempts
    #[arg(long, env = "MEND_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Build command
    #[arg(long)]
    pub build_cmd: Option<String>,

    /// Log commands instead of executing them
    #[arg(long)]
    pub dry_run: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Resolve the project root against the working directory.
pub fn resolve_project(project: &Path) -> Result<PathBuf> {
    let path = if project.is_absolute() {
        project.to_path_buf()
    } else {
        std::env::current_dir()?.join(project)
    };
    if !path.is_dir() {
        return Err(CliError::ProjectNotFound(path).into());
    }
    Ok(path)
}

impl PipelineArgs {
    /// Load the configuration and apply the shared overrides. Callers
    /// validate once their own overrides are in.
    pub fn load_config(&self, project: &Path) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => PipelineConfig::load(project).context("Failed to load configuration")?,
        };

        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(build_cmd) = &self.build_cmd {
            config.build_command = build_cmd.clone();
        }
        Ok(config)
    }

    pub fn open_memory(&self, project: &Path) -> Result<Arc<FileRepairMemory>> {
        let memory = match &self.memory {
            Some(path) => FileRepairMemory::open(path),
            None => FileRepairMemory::for_project(project),
        }
        .context("Failed to open repair memory")?;
        debug!("Repair memory: {}", memory.path().display());
        Ok(Arc::new(memory))
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        let mut options = ProcessRunnerOptions::new();
        if self.dry_run {
            options = options.dry_run();
        }
        Arc::new(ProcessRunner::new(options))
    }
}

/// Print `value` as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{}", json);
    Ok(())
}
