//! Memory command - Inspect repair memory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use mend_memory::{FileRepairMemory, RepairMemory, RepairMemoryEntry};
use mend_patterns::ErrorSignature;

use super::{print_json, resolve_project, OutputFormat};
use crate::ExitCodes;

#[derive(Args)]
pub struct MemoryArgs {
    #[command(subcommand)]
    pub action: MemoryAction,

    /// Repair memory file
    #[arg(long, env = "MEND_MEMORY", global = true)]
    pub memory: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum MemoryAction {
    /// List every entry
    List,

    /// Show the entry for one signature
    Show {
        /// Signature, e.g. `container:docker_no_space`
        signature: String,
    },
}

pub fn execute(project: &Path, args: MemoryArgs) -> Result<u8> {
    let memory = match &args.memory {
        Some(path) => FileRepairMemory::open(path),
        None => FileRepairMemory::for_project(resolve_project(project)?),
    }
    .context("Failed to open repair memory")?;

    match args.action {
        MemoryAction::List => {
            let entries = memory.entries()?;
            match args.format {
                OutputFormat::Json => print_json(&entries)?,
                OutputFormat::Text if entries.is_empty() => {
                    println!("No entries in {}", memory.path().display());
                }
                OutputFormat::Text => {
                    for entry in &entries {
                        print_entry_line(entry);
                    }
                }
            }
            Ok(ExitCodes::SUCCESS)
        }
        MemoryAction::Show { signature } => {
            let Some(entry) = memory.lookup(&ErrorSignature::new(signature.clone()))? else {
                eprintln!("No entry for {}", signature);
                return Ok(ExitCodes::FAILURE);
            };
            match args.format {
                OutputFormat::Json => print_json(&entry)?,
                OutputFormat::Text => print_entry(&entry),
            }
            Ok(ExitCodes::SUCCESS)
        }
    }
}

fn print_entry_line(entry: &RepairMemoryEntry) {
    println!(
        "{:<40} {:<28} {:>3}✓ {:>3}✗  {:>4.0}%",
        entry.signature.to_string(),
        entry.fix_name,
        entry.success_count,
        entry.failure_count,
        entry.success_rate() * 100.0
    );
}

fn print_entry(entry: &RepairMemoryEntry) {
    println!("Signature:    {}", entry.signature);
    println!("Category:     {}", entry.category);
    println!("Fix:          {}", entry.fix_name);
    println!("Description:  {}", entry.description);
    println!("Confidence:   {:.2}", entry.confidence);
    println!(
        "Track record: {} succeeded, {} failed ({:.0}%)",
        entry.success_count,
        entry.failure_count,
        entry.success_rate() * 100.0
    );
    println!("Last used:    {}", entry.last_used_at.to_rfc3339());
}
