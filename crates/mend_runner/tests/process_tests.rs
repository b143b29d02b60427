//! Integration tests for the subprocess runner and fix executor.
//!
//! These spawn small POSIX utilities, so they only run on unix hosts.

#![cfg(unix)]

use std::sync::Arc;

use parking_lot::Mutex;

use mend_runner::{
    CommandRunner, CommandSpec, FixExecutor, LogLine, LogStream, ProcessRunner,
    ProcessRunnerOptions, RunConfig,
};

/// Test stdout and stderr are both captured.
#[tokio::test]
async fn test_captures_combined_output() {
    let runner = ProcessRunner::default();
    let spec = CommandSpec::new("sh").args(["-c", "echo building; echo 'error TS2307' >&2; exit 2"]);

    let result = runner.run(&spec, &RunConfig::default()).await.unwrap();

    assert_eq!(result.exit_code, 2);
    assert!(!result.success());
    assert_eq!(result.stdout, "building\n");
    assert_eq!(result.stderr, "error TS2307\n");
    assert!(result.combined_output().contains("building"));
    assert!(result.combined_output().contains("error TS2307"));
}

/// Test bytes that are not UTF-8 do not cut off the rest of the stream.
#[tokio::test]
async fn test_invalid_utf8_keeps_following_lines() {
    let runner = ProcessRunner::default();
    let spec = CommandSpec::new("sh").args([
        "-c",
        "printf 'gcc: caf\\351 warning\\nerror TS2307: Cannot find module zod\\n' >&2; exit 1",
    ]);

    let result = runner.run(&spec, &RunConfig::default()).await.unwrap();

    assert_eq!(result.exit_code, 1);
    let lines: Vec<&str> = result.stderr.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("gcc: caf"));
    assert!(lines[0].contains('\u{FFFD}'));
    assert_eq!(lines[1], "error TS2307: Cannot find module zod");
}

/// Test a hung command is killed and reported as timed out.
#[tokio::test]
async fn test_timeout_kills_command() {
    let runner = ProcessRunner::default();
    let spec = CommandSpec::new("sleep").arg("30");

    let started = std::time::Instant::now();
    let result = runner.run(&spec, &RunConfig::default().timeout(1)).await.unwrap();

    assert!(result.timed_out);
    assert!(!result.success());
    assert!(started.elapsed().as_secs() < 10);
}

/// Test the working directory and environment are applied.
#[tokio::test]
async fn test_workdir_and_env() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ProcessRunner::default();
    let spec = CommandSpec::new("sh")
        .args(["-c", "pwd; echo $MEND_TEST_VALUE"])
        .workdir(dir.path())
        .env("MEND_TEST_VALUE", "42");

    let result = runner.run(&spec, &RunConfig::default()).await.unwrap();

    assert!(result.success());
    let canonical = dir.path().canonicalize().unwrap();
    let mut lines = result.stdout.lines();
    assert_eq!(
        std::path::Path::new(lines.next().unwrap()).canonicalize().unwrap(),
        canonical
    );
    assert_eq!(lines.next(), Some("42"));
}

/// Test streamed lines reach the log handler.
#[tokio::test]
async fn test_streaming_log_handler() {
    let seen: Arc<Mutex<Vec<LogLine>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let runner = ProcessRunner::new(ProcessRunnerOptions::new().ci_mode())
        .with_log_handler(Arc::new(move |line| sink.lock().push(line)));

    let spec = CommandSpec::new("sh").args(["-c", "echo one; echo two >&2"]);
    runner.run(&spec, &RunConfig::default().stream()).await.unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().any(|l| l.stream == LogStream::Stdout && l.message == "one"));
    assert!(seen.iter().any(|l| l.stream == LogStream::Stderr && l.message == "two"));
}

/// Test the fix executor reports a real timeout without raising.
#[tokio::test]
async fn test_fix_executor_bounded_by_timeout() {
    let executor = FixExecutor::new(Arc::new(ProcessRunner::default())).with_timeout(1);

    let outcome = executor.execute_fix(&CommandSpec::new("sleep").arg("30")).await;

    assert!(!outcome.ok);
    assert!(outcome.error.unwrap().contains("timed out"));
}

/// Test availability probing.
#[tokio::test]
async fn test_is_available() {
    let runner = ProcessRunner::default();
    assert!(runner.is_available("sh").await.unwrap());
    assert!(!runner.is_available("definitely-not-a-real-program-xyz").await.unwrap());
}
