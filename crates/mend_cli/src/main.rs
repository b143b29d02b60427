//! Mend CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success (pipeline green, or a fix was applied)
//! - 1: Failure (escalated, or nothing could be remediated)
//! - 2: Invalid arguments or unusable configuration

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, CliError, Commands};
use mend_core::{state_dir, CoreError};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const FAILURE: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing the current step and stopping");
            on_signal.cancel();
        }
    });

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(&cli.project, args, cancel).await,
        Commands::Remediate(args) => {
            commands::remediate::execute(&cli.project, args, cancel).await
        }
        Commands::Diagnose(args) => commands::diagnose::execute(&cli.project, args).await,
        Commands::Patterns(args) => commands::patterns::execute(args),
        Commands::Memory(args) => commands::memory::execute(&cli.project, args),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(categorize_error(&e))
        }
    }
}

/// Console output plus, for commands that touch the project, a plain-text
/// log under `<project>/.mend/logs`.
fn init_logging(cli: &Cli) {
    let default = if cli.verbose {
        "mend=debug,info"
    } else if cli.quiet {
        "warn"
    } else {
        "mend=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let file_layer = cli
        .command
        .writes_state()
        .then(|| open_log_file(&cli.project))
        .flatten()
        .map(|file| fmt::layer().with_ansi(false).with_writer(Mutex::new(file)));

    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

fn open_log_file(project: &Path) -> Option<fs::File> {
    let dir = state_dir(project).join("logs");
    fs::create_dir_all(&dir).ok()?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("mend.log"))
        .ok()
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if e.downcast_ref::<CliError>().is_some() {
        return ExitCodes::INVALID_ARGS;
    }
    match e.downcast_ref::<CoreError>() {
        Some(CoreError::InvalidConfig(_)) | Some(CoreError::ConfigParse(_)) => {
            ExitCodes::INVALID_ARGS
        }
        _ => ExitCodes::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_invalid_config_is_invalid_args() {
        let err = anyhow::Error::from(CoreError::InvalidConfig("max_retries must be at least 1".into()))
            .context("Failed to load configuration");
        assert_eq!(categorize_error(&err), ExitCodes::INVALID_ARGS);
    }

    #[test]
    fn test_missing_project_is_invalid_args() {
        let err = anyhow::Error::from(CliError::ProjectNotFound("/nowhere".into()));
        assert_eq!(categorize_error(&err), ExitCodes::INVALID_ARGS);
    }

    #[test]
    fn test_other_errors_are_failures() {
        let err: anyhow::Error = Err::<(), _>(std::io::Error::other("boom"))
            .context("Failed to read build output")
            .unwrap_err();
        assert_eq!(categorize_error(&err), ExitCodes::FAILURE);
    }
}
