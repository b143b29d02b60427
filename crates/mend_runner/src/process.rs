//! Subprocess-based command runner.
//!
//! Spawns programs with tokio, captures stdout and stderr concurrently, and
//! kills the child when it outlives its timeout. Used for the external build
//! tool, fix commands and the service launch command alike.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{CommandSpec, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// How long to wait for output readers after the child has exited or been killed.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Log output from a running command.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: chrono::DateTime<Utc>,
    pub stream: LogStream,
    pub message: String,
}

/// Log stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Log handler callback type.
pub type LogHandler = Arc<dyn Fn(LogLine) + Send + Sync>;

/// Process runner options.
#[derive(Debug, Clone)]
pub struct ProcessRunnerOptions {
    /// Dry-run mode (log commands without executing)
    pub dry_run: bool,
    /// CI mode (timestamped, stream-tagged log lines)
    pub ci_mode: bool,
}

impl Default for ProcessRunnerOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            ci_mode: std::env::var("CI").is_ok(),
        }
    }
}

impl ProcessRunnerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn ci_mode(mut self) -> Self {
        self.ci_mode = true;
        self
    }
}

/// Where captured lines go besides the returned buffer.
#[derive(Clone)]
struct LineSink {
    stream_logs: bool,
    ci_mode: bool,
    handler: Option<LogHandler>,
}

impl LineSink {
    fn emit(&self, stream: LogStream, message: &str) {
        if !self.stream_logs {
            return;
        }
        let line = LogLine {
            timestamp: Utc::now(),
            stream,
            message: message.to_string(),
        };
        if self.ci_mode {
            println!(
                "[{}] [{}] {}",
                line.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                line.stream,
                line.message
            );
        } else {
            match stream {
                LogStream::Stdout => println!("{}", line.message),
                LogStream::Stderr => eprintln!("{}", line.message),
            }
        }
        if let Some(handler) = &self.handler {
            handler(line);
        }
    }
}

/// Subprocess command runner.
pub struct ProcessRunner {
    options: ProcessRunnerOptions,
    log_handler: Option<LogHandler>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(ProcessRunnerOptions::default())
    }
}

impl ProcessRunner {
    pub fn new(options: ProcessRunnerOptions) -> Self {
        Self {
            options,
            log_handler: None,
        }
    }

    /// Set a log handler for streamed lines.
    pub fn with_log_handler(mut self, handler: LogHandler) -> Self {
        self.log_handler = Some(handler);
        self
    }

    /// Check if dry-run mode is enabled.
    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    fn sink(&self, run_config: &RunConfig) -> LineSink {
        LineSink {
            stream_logs: run_config.stream_logs,
            ci_mode: self.options.ci_mode,
            handler: self.log_handler.clone(),
        }
    }

    fn build_command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

fn spawn_reader<R>(reader: Option<R>, stream: LogStream, sink: LineSink) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut output = String::new();
        let Some(reader) = reader else {
            return output;
        };

        // Lines are split on raw bytes; build tools do not promise UTF-8.
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    let line = text.trim_end_matches(['\n', '\r']);
                    sink.emit(stream, line);
                    output.push_str(line);
                    output.push('\n');
                }
                Err(e) => {
                    warn!("Stopped reading {:?}: {}", stream, e);
                    break;
                }
            }
        }
        output
    })
}

/// Collect a reader's output, giving up (and aborting it) if a lingering
/// grandchild keeps the pipe open.
async fn drain(mut task: JoinHandle<String>) -> String {
    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("Output reader failed: {}", e);
            String::new()
        }
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn is_available(&self, program: &str) -> RunnerResult<bool> {
        let status = Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        Ok(status.is_ok())
    }

    async fn run(&self, spec: &CommandSpec, run_config: &RunConfig) -> RunnerResult<ExecutionResult> {
        if spec.program.trim().is_empty() {
            return Err(RunnerError::InvalidCommand("empty program".to_string()));
        }

        if self.options.dry_run {
            info!("[DRY-RUN] Would execute: {}", spec);
            let now = Utc::now();
            return Ok(ExecutionResult {
                exit_code: 0,
                stdout: format!("[DRY-RUN] Command: {}", spec),
                stderr: String::new(),
                started_at: now,
                finished_at: now,
                duration_ms: 0,
                timed_out: false,
            });
        }

        debug!("Executing: {}", spec);
        let started_at = Utc::now();

        let mut child = Self::build_command(spec)
            .spawn()
            .map_err(|e| RunnerError::SpawnFailed {
                program: spec.program.clone(),
                message: e.to_string(),
            })?;

        let sink = self.sink(run_config);
        let stdout_task = spawn_reader(child.stdout.take(), LogStream::Stdout, sink.clone());
        let stderr_task = spawn_reader(child.stderr.take(), LogStream::Stderr, sink);

        let (exit_code, timed_out) = if run_config.timeout_seconds > 0 {
            let limit = Duration::from_secs(run_config.timeout_seconds);
            match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => {
                    let status = status.map_err(|e| {
                        RunnerError::ExecutionFailed(format!("Failed to wait for process: {}", e))
                    })?;
                    (status.code().unwrap_or(-1) as i64, false)
                }
                Err(_) => {
                    warn!(
                        "Command exceeded {}s timeout, killing: {}",
                        run_config.timeout_seconds, spec
                    );
                    if let Err(e) = child.kill().await {
                        error!("Failed to kill timed-out command: {}", e);
                    }
                    (-1, true)
                }
            }
        } else {
            let status = child.wait().await.map_err(|e| {
                RunnerError::ExecutionFailed(format!("Failed to wait for process: {}", e))
            })?;
            (status.code().unwrap_or(-1) as i64, false)
        };

        let stdout = drain(stdout_task).await;
        let stderr = drain(stderr_task).await;
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        if exit_code == 0 && !timed_out {
            debug!("Command completed successfully in {}ms", duration_ms);
        } else {
            debug!(
                "Command failed with exit code {} after {}ms (timed out: {})",
                exit_code, duration_ms, timed_out
            );
        }

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
            started_at,
            finished_at,
            duration_ms,
            timed_out,
        })
    }
}
