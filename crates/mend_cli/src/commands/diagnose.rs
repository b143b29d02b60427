//! Diagnose command - Classify build output without side effects.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use mend_core::{diagnose_output, rank_fixes, DiagnosedFailure, PipelineConfig, RankedFix};
use mend_memory::{FileRepairMemory, RepairMemory};
use mend_patterns::{HeuristicDiagnoser, PatternRegistry};

use super::remediate::read_output;
use super::{print_json, resolve_project, OutputFormat};
use crate::ExitCodes;

#[derive(Args)]
pub struct DiagnoseArgs {
    /// File holding the build output, or `-` for stdin
    #[arg(short, long)]
    pub output: String,

    /// Repair memory file consulted for ranking
    #[arg(long, env = "MEND_MEMORY")]
    pub memory: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Serialize)]
struct DiagnoseReport {
    failure: Option<DiagnosedFailure>,
    fixes: Vec<RankedFix>,
}

pub async fn execute(project: &Path, args: DiagnoseArgs) -> Result<u8> {
    let project = resolve_project(project)?;
    let config = PipelineConfig::load(&project).context("Failed to load configuration")?;
    let output = read_output(&args.output).await?;

    let registry = PatternRegistry::builtin().context("Failed to build pattern registry")?;
    let failure = diagnose_output(&registry, &HeuristicDiagnoser::new(), &output);

    let fixes = match &failure {
        Some(failure) => {
            let memory = match &args.memory {
                Some(path) => FileRepairMemory::open(path),
                None => FileRepairMemory::for_project(&project),
            }
            .context("Failed to open repair memory")?;
            let entry = memory.lookup(&failure.signature)?;
            rank_fixes(failure, entry.as_ref(), config.memory_threshold)
        }
        None => Vec::new(),
    };

    let code = if failure.is_some() {
        ExitCodes::SUCCESS
    } else {
        ExitCodes::FAILURE
    };

    let report = DiagnoseReport { failure, fixes };
    match args.format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_report(&report),
    }
    Ok(code)
}

fn print_report(report: &DiagnoseReport) {
    let Some(failure) = &report.failure else {
        println!("No known pattern or heuristic matched.");
        return;
    };

    println!("Signature: {}", failure.signature);
    println!("Category:  {}", failure.category);
    println!("Source:    {:?}", failure.source);
    if !failure.classified.is_empty() {
        println!();
        println!("Errors:");
        for error in &failure.classified {
            println!("  line {}: {}", error.line_number, error.summary());
        }
    }

    println!();
    println!("Fixes, in the order they would be tried:");
    for (i, fix) in report.fixes.iter().enumerate() {
        let command = fix
            .command
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "manual".to_string());
        println!(
            "  {}. {} [{:.2}, {:?}] {}: {}",
            i + 1,
            fix.fix,
            fix.confidence,
            fix.source,
            command,
            fix.description
        );
    }
}
