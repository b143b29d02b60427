//! Run command - Drive a project through the full pipeline.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mend_core::{EventLog, Orchestrator, PendingStore, PipelineConfig, PipelineReport};
use mend_runner::DockerServiceStatus;

use super::{print_json, resolve_project, OutputFormat, PipelineArgs};
use crate::ExitCodes;

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Skip PreFlight checks
    #[arg(long)]
    pub skip_preflight: bool,

    /// Skip the lockfile freshness check only
    #[arg(long)]
    pub skip_lockcheck: bool,

    /// Launch command
    #[arg(long)]
    pub launch_cmd: Option<String>,

    /// URL polled after launch; repeatable
    #[arg(long)]
    pub health_url: Vec<String>,

    /// Number of services expected to be running after launch
    #[arg(long)]
    pub expected_services: Option<usize>,

    /// Count every container on the daemon, not just the compose project's
    #[arg(long)]
    pub all_containers: bool,
}

impl RunArgs {
    fn config(&self, project: &Path) -> Result<PipelineConfig> {
        let mut config = self.pipeline.load_config(project)?;
        config.skip_preflight |= self.skip_preflight;
        config.skip_lockcheck |= self.skip_lockcheck;
        config.scan_all_containers |= self.all_containers;
        if let Some(launch_cmd) = &self.launch_cmd {
            config.launch_command = launch_cmd.clone();
        }
        config.health_urls.extend(self.health_url.iter().cloned());
        if self.expected_services.is_some() {
            config.expected_services = self.expected_services;
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

pub async fn execute(project: &Path, args: RunArgs, cancel: CancellationToken) -> Result<u8> {
    let project = resolve_project(project)?;
    let config = args.config(&project)?;
    info!("Running pipeline on: {}", project.display());

    let memory = args.pipeline.open_memory(&project)?;
    let scope = config.container_scope(&project);
    let expected_services = config.expected_services;

    let mut orchestrator = Orchestrator::new(&project, config, args.pipeline.runner(), memory)?
        .with_event_log(EventLog::for_project(&project))
        .with_cancellation(cancel);

    if !args.pipeline.dry_run {
        orchestrator = orchestrator.with_pending_store(PendingStore::for_project(&project));
        match scope {
            Some(scope) => match DockerServiceStatus::new(scope).await {
                Ok(source) => orchestrator = orchestrator.with_service_status(Arc::new(source)),
                Err(e) if expected_services.is_some() => {
                    warn!("Service checks skipped, Docker unavailable: {}", e);
                }
                Err(_) => {}
            },
            None => warn!(
                "Service checks skipped, no compose project name for {}; set compose_project",
                project.display()
            ),
        }
    }

    let report = orchestrator.run().await.context("Pipeline failed")?;

    match args.pipeline.format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_report(&report),
    }

    Ok(if report.succeeded() {
        ExitCodes::SUCCESS
    } else {
        ExitCodes::FAILURE
    })
}

fn print_report(report: &PipelineReport) {
    let failed_checks: Vec<_> = report.preflight.iter().filter(|c| !c.passed).collect();
    if !failed_checks.is_empty() {
        println!("PreFlight:");
        for check in failed_checks {
            println!("  ✗ {}: {}", check.check, check.message);
        }
        println!();
    }

    if !report.attempts.is_empty() {
        println!("Attempts:");
        for attempt in &report.attempts {
            let signature = attempt
                .signature
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unclassified".to_string());
            println!("  {}. {} → {:?}", attempt.attempt_number, signature, attempt.outcome);
            for fix in &attempt.fixes_applied {
                let mark = if fix.ok { "✓" } else { "✗" };
                println!("     {} {} ({})", mark, fix.fix_name, fix.command);
            }
        }
        println!();
    }

    if let Some(health) = &report.health {
        for check in &health.checks {
            let mark = if check.healthy { "✓" } else { "⚠" };
            println!("  {} {}: {}", mark, check.name, check.message);
        }
        println!();
    }

    match &report.escalation {
        Some(escalation) => {
            println!("❌ Escalated during {} ({})", escalation.phase, escalation.reason);
            println!("{}", escalation.message);
        }
        None if report.degraded() => {
            println!("⚠️  Succeeded with degraded health ({} fix(es) applied)", report.fixes_applied());
        }
        None => {
            println!("✅ Succeeded ({} fix(es) applied)", report.fixes_applied());
        }
    }
}
