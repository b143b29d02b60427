//! Remediate command - Single-shot repair hook.
//!
//! A build script calls this after a failed build, passing the captured
//! output. Exit 0 means a fix was applied and the build should be retried;
//! exit 1 means a human is needed. The fix applied is judged by the output
//! of the next call (or the next `mend run`) and recorded in repair memory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use mend_core::{EventLog, Orchestrator, PendingStore, RemediationOutcome};

use super::{print_json, resolve_project, CliError, OutputFormat, PipelineArgs};
use crate::ExitCodes;

#[derive(Args)]
pub struct RemediateArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// File holding the failed build's output, or `-` for stdin
    #[arg(short, long)]
    pub output: String,
}

pub async fn execute(
    project: &Path,
    args: RemediateArgs,
    cancel: CancellationToken,
) -> Result<u8> {
    let project = resolve_project(project)?;
    let config = args.pipeline.load_config(&project)?;
    config.validate().context("Invalid configuration")?;

    let output = read_output(&args.output).await?;
    info!("Remediating {} bytes of build output", output.len());

    let memory = args.pipeline.open_memory(&project)?;
    let mut orchestrator = Orchestrator::new(&project, config, args.pipeline.runner(), memory)?
        .with_event_log(EventLog::for_project(&project))
        .with_cancellation(cancel);
    if !args.pipeline.dry_run {
        orchestrator = orchestrator.with_pending_store(PendingStore::for_project(&project));
    }

    let outcome = orchestrator.remediate_once(&output).await;

    match args.pipeline.format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Text => print_outcome(&outcome),
    }

    Ok(if outcome.applied().is_some() {
        ExitCodes::SUCCESS
    } else {
        ExitCodes::FAILURE
    })
}

/// Read build output from a file, or stdin for `-`.
pub async fn read_output(source: &str) -> Result<String> {
    let bytes = if source == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("Failed to read build output from stdin")?;
        buf
    } else {
        let path = PathBuf::from(source);
        if !path.is_file() {
            return Err(CliError::OutputNotFound(path).into());
        }
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read build output from {}", path.display()))?
    };
    // Build logs are not guaranteed to be UTF-8.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn print_outcome(outcome: &RemediationOutcome) {
    if let Some(signature) = &outcome.signature {
        println!("Diagnosed: {}", signature);
    }
    for fix in &outcome.attempted {
        let mark = if fix.ok { "✓" } else { "✗" };
        match &fix.error {
            Some(error) => println!("  {} {} ({}): {}", mark, fix.fix_name, fix.command, error),
            None => println!("  {} {} ({})", mark, fix.fix_name, fix.command),
        }
    }

    match (outcome.applied(), outcome.reason) {
        (Some(fix), _) => println!("✅ Applied {}; retry the build", fix.fix_name),
        (None, Some(reason)) => println!("❌ Could not remediate ({})", reason),
        (None, None) => println!("❌ Could not remediate"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(output: &Path, memory: &Path) -> RemediateArgs {
        RemediateArgs {
            pipeline: PipelineArgs {
                config: None,
                memory: Some(memory.to_path_buf()),
                max_retries: None,
                build_cmd: None,
                dry_run: true,
                format: OutputFormat::Text,
            },
            output: output.to_string_lossy().into_owned(),
        }
    }

    #[tokio::test]
    async fn test_exit_code_reports_whether_a_fix_was_applied() {
        let project = TempDir::new().unwrap();
        let log = project.path().join("build.log");
        let memory = project.path().join("memory.json");

        std::fs::write(&log, "npm ERR! code ERESOLVE\nnpm ERR! ERESOLVE unable to resolve dependency tree\n").unwrap();
        let code = execute(project.path(), args(&log, &memory), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(code, ExitCodes::SUCCESS);

        std::fs::write(&log, "all good, nothing to see\n").unwrap();
        let code = execute(project.path(), args(&log, &memory), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(code, ExitCodes::FAILURE);

        // Recognized, but raising the heap limit is left to a human.
        std::fs::write(&log, "FATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory\n").unwrap();
        let code = execute(project.path(), args(&log, &memory), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(code, ExitCodes::FAILURE);
    }

    #[tokio::test]
    async fn test_invalid_configuration_exits_with_invalid_args() {
        let project = TempDir::new().unwrap();
        let log = project.path().join("build.log");
        std::fs::write(&log, "npm ERR! code ERESOLVE\n").unwrap();
        let mut args = args(&log, &project.path().join("memory.json"));
        args.pipeline.max_retries = Some(0);

        let err = execute(project.path(), args, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(crate::categorize_error(&err), ExitCodes::INVALID_ARGS);
    }

    #[tokio::test]
    async fn test_read_output_from_file() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("build.log");
        std::fs::write(&log, "npm ERR! code ERESOLVE\n").unwrap();

        let output = read_output(log.to_str().unwrap()).await.unwrap();
        assert!(output.contains("ERESOLVE"));
    }

    #[tokio::test]
    async fn test_read_output_tolerates_invalid_utf8() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("build.log");
        std::fs::write(&log, b"gcc: caf\xe9 warning\nnpm ERR! code ERESOLVE\n").unwrap();

        let output = read_output(log.to_str().unwrap()).await.unwrap();
        assert!(output.contains('\u{FFFD}'));
        assert!(output.lines().nth(1).unwrap().contains("ERESOLVE"));
    }

    #[tokio::test]
    async fn test_missing_output_file_is_invalid_input() {
        let err = read_output("/no/such/build.log").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::OutputNotFound(_))
        ));
    }
}
