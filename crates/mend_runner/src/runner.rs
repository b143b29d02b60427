//! Command runner trait and types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CommandSpec, RunConfig};
use crate::error::RunnerResult;

/// Result of a command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code (-1 when killed or terminated by a signal)
    pub exit_code: i64,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Execution start time
    pub started_at: DateTime<Utc>,
    /// Execution end time
    pub finished_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Whether the command was killed for exceeding its timeout
    pub timed_out: bool,
}

impl ExecutionResult {
    /// Check if execution was successful (exit code 0, not timed out).
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Get combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Subprocess runner.
///
/// Implementations run one command at a time per call; callers that need
/// serialized side effects simply await each call before issuing the next.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Check whether a program can be found and started.
    async fn is_available(&self, program: &str) -> RunnerResult<bool>;

    /// Run a command to completion (or timeout) and capture its output.
    ///
    /// A timeout is not an error: it is reported through
    /// [`ExecutionResult::timed_out`]. Errors are reserved for commands that
    /// could not be started at all.
    async fn run(&self, spec: &CommandSpec, run_config: &RunConfig) -> RunnerResult<ExecutionResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i64, stdout: &str, stderr: &str) -> ExecutionResult {
        let now = Utc::now();
        ExecutionResult {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            timed_out: false,
        }
    }

    #[test]
    fn test_combined_output() {
        assert_eq!(result(0, "out", "").combined_output(), "out");
        assert_eq!(result(0, "", "err").combined_output(), "err");
        assert_eq!(result(1, "out", "err").combined_output(), "out\nerr");
    }

    #[test]
    fn test_timed_out_is_not_success() {
        let mut r = result(0, "", "");
        assert!(r.success());
        r.timed_out = true;
        assert!(!r.success());
    }
}
