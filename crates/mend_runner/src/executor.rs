//! Fix executor.
//!
//! Runs a resolved remediation command with a hard timeout. Execution never
//! raises: a spawn failure, timeout or non-zero exit all come back as a
//! [`FixOutcome`] with `ok == false`, which callers treat as "this fix does
//! not apply, try the next candidate".

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{CommandSpec, RunConfig};
use crate::runner::CommandRunner;

/// Result of executing a fix command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixOutcome {
    pub ok: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl FixOutcome {
    fn failed(error: impl Into<String>, output: String, duration_ms: u64) -> Self {
        Self {
            ok: false,
            output,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// Executes fix commands one at a time with a bounded timeout.
#[derive(Clone)]
pub struct FixExecutor {
    runner: Arc<dyn CommandRunner>,
    timeout_seconds: u64,
    workdir: Option<PathBuf>,
}

impl FixExecutor {
    /// Default hard timeout for a single fix command.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            timeout_seconds: Self::DEFAULT_TIMEOUT_SECS,
            workdir: None,
        }
    }

    /// Set the hard timeout. Zero is clamped to one second; fixes are never unbounded.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds.max(1);
        self
    }

    /// Directory used for commands that do not set their own.
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    /// Execute a fix command.
    pub async fn execute_fix(&self, command: &CommandSpec) -> FixOutcome {
        let mut command = command.clone();
        if command.workdir.is_none() {
            command.workdir = self.workdir.clone();
        }

        info!("Applying fix: {}", command);
        let run_config = RunConfig::default().timeout(self.timeout_seconds);

        match self.runner.run(&command, &run_config).await {
            Ok(result) if result.timed_out => {
                warn!("Fix timed out after {}s: {}", self.timeout_seconds, command);
                FixOutcome::failed(
                    format!("timed out after {}s", self.timeout_seconds),
                    result.combined_output(),
                    result.duration_ms,
                )
            }
            Ok(result) if !result.success() => {
                warn!("Fix exited with code {}: {}", result.exit_code, command);
                FixOutcome::failed(
                    format!("exited with code {}", result.exit_code),
                    result.combined_output(),
                    result.duration_ms,
                )
            }
            Ok(result) => FixOutcome {
                ok: true,
                output: result.combined_output(),
                error: None,
                duration_ms: result.duration_ms,
            },
            Err(e) => {
                warn!("Fix could not be started: {}", e);
                FixOutcome::failed(e.to_string(), String::new(), 0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockResponse, MockRunner};

    #[tokio::test]
    async fn test_successful_fix() {
        let runner = MockRunner::new().add_response(MockResponse::success("added 12 packages"));
        let executor = FixExecutor::new(Arc::new(runner.clone())).with_workdir("/project");

        let outcome = executor
            .execute_fix(&CommandSpec::new("npm").arg("install"))
            .await;

        assert!(outcome.ok);
        assert_eq!(outcome.output, "added 12 packages");
        assert!(outcome.error.is_none());

        let calls = runner.get_calls();
        assert_eq!(calls[0].workdir, Some(PathBuf::from("/project")));
        assert_eq!(calls[0].timeout_seconds, 120);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_recoverable() {
        let runner = MockRunner::new().add_response(MockResponse::failure(1, "npm ERR! oops"));
        let executor = FixExecutor::new(Arc::new(runner));

        let outcome = executor.execute_fix(&CommandSpec::new("npm").arg("install")).await;

        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("exited with code 1"));
        assert_eq!(outcome.output, "npm ERR! oops");
    }

    #[tokio::test]
    async fn test_timeout_is_recoverable() {
        let runner = MockRunner::new().add_response(MockResponse::timeout());
        let executor = FixExecutor::new(Arc::new(runner)).with_timeout(0);

        assert_eq!(executor.timeout_seconds(), 1);
        let outcome = executor.execute_fix(&CommandSpec::new("docker").arg("pull")).await;

        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_recoverable() {
        let runner = MockRunner::new().simulate_failure("no such program");
        let executor = FixExecutor::new(Arc::new(runner));

        let outcome = executor.execute_fix(&CommandSpec::new("missing")).await;

        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("no such program"));
    }
}
