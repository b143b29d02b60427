//! Mock command runner for testing.
//!
//! Provides a configurable mock implementation of the CommandRunner trait so
//! the build tool, fix commands and launch command can be scripted in tests
//! without spawning real processes.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::config::{CommandSpec, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// Predefined mock response for a command execution.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 100,
            timed_out: false,
        }
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 100,
            timed_out: false,
        }
    }

    pub fn timeout() -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            timed_out: true,
        }
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub program: String,
    pub args: Vec<String>,
    /// Rendered command line
    pub command: String,
    pub workdir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout_seconds: u64,
}

/// A scripted queue of responses for commands containing `pattern`.
#[derive(Debug, Clone)]
struct Script {
    pattern: String,
    responses: Vec<MockResponse>,
    next: usize,
}

impl Script {
    /// Returns responses in order, repeating the last one once exhausted.
    fn take(&mut self) -> Option<MockResponse> {
        let last = self.responses.len().checked_sub(1)?;
        let response = self.responses.get(self.next.min(last)).cloned();
        self.next += 1;
        response
    }
}

/// Mock command runner for testing.
///
/// Commands are answered by the first script whose pattern occurs in the
/// rendered command line; anything else falls back to the shared response
/// list, which cycles.
#[derive(Clone)]
pub struct MockRunner {
    scripts: Arc<RwLock<Vec<Script>>>,
    responses: Arc<RwLock<Vec<MockResponse>>>,
    response_index: Arc<AtomicUsize>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    unavailable: Arc<RwLock<HashSet<String>>>,
    simulate_failure: Arc<RwLock<Option<String>>>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(RwLock::new(Vec::new())),
            responses: Arc::new(RwLock::new(Vec::new())),
            response_index: Arc::new(AtomicUsize::new(0)),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
            unavailable: Arc::new(RwLock::new(HashSet::new())),
            simulate_failure: Arc::new(RwLock::new(None)),
        }
    }

    /// Script responses for commands whose rendered line contains `pattern`.
    pub fn on(self, pattern: impl Into<String>, responses: Vec<MockResponse>) -> Self {
        self.scripts.write().push(Script {
            pattern: pattern.into(),
            responses,
            next: 0,
        });
        self
    }

    /// Add a fallback response.
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.write().push(response);
        self
    }

    /// Replace the fallback responses.
    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        *self.responses.write() = responses;
        self
    }

    /// Report a program as not installed.
    pub fn set_unavailable(self, program: impl Into<String>) -> Self {
        self.unavailable.write().insert(program.into());
        self
    }

    /// Make every run fail to start with the given message.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.simulate_failure.write() = Some(message.into());
        self
    }

    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Rendered command lines, in call order.
    pub fn commands(&self) -> Vec<String> {
        self.captured_calls
            .read()
            .iter()
            .map(|c| c.command.clone())
            .collect()
    }

    /// Check whether any call's command line contains `pattern`.
    pub fn was_called(&self, pattern: &str) -> bool {
        self.captured_calls
            .read()
            .iter()
            .any(|c| c.command.contains(pattern))
    }

    /// Number of calls whose command line contains `pattern`.
    pub fn count_calls(&self, pattern: &str) -> usize {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.command.contains(pattern))
            .count()
    }

    fn record_call(&self, spec: &CommandSpec, run_config: &RunConfig) {
        self.captured_calls.write().push(CapturedCall {
            program: spec.program.clone(),
            args: spec.args.clone(),
            command: spec.display(),
            workdir: spec.workdir.clone(),
            env: spec.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            timeout_seconds: run_config.timeout_seconds,
        });
    }

    fn next_response(&self, command: &str) -> MockResponse {
        {
            let mut scripts = self.scripts.write();
            if let Some(script) = scripts.iter_mut().find(|s| command.contains(&s.pattern)) {
                if let Some(response) = script.take() {
                    return response;
                }
            }
        }

        let responses = self.responses.read();
        if responses.is_empty() {
            return MockResponse::success("");
        }
        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        responses
            .get(index % responses.len())
            .cloned()
            .unwrap_or_else(|| MockResponse::success(""))
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn is_available(&self, program: &str) -> RunnerResult<bool> {
        Ok(!self.unavailable.read().contains(program))
    }

    async fn run(&self, spec: &CommandSpec, run_config: &RunConfig) -> RunnerResult<ExecutionResult> {
        self.record_call(spec, run_config);

        if let Some(message) = self.simulate_failure.read().clone() {
            return Err(RunnerError::SpawnFailed {
                program: spec.program.clone(),
                message,
            });
        }

        let response = self.next_response(&spec.display());
        let started_at = Utc::now();
        let finished_at = started_at + chrono::Duration::milliseconds(response.duration_ms as i64);

        Ok(ExecutionResult {
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at,
            finished_at,
            duration_ms: response.duration_ms,
            timed_out: response.timed_out,
        })
    }
}
