//! Patterns command - List the registry and heuristic rules.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{json, Value};

use mend_patterns::{ErrorCategory, HeuristicDiagnoser, PatternRegistry};

use super::{print_json, OutputFormat};
use crate::ExitCodes;

#[derive(Args)]
pub struct PatternsArgs {
    /// Only show patterns in this category
    #[arg(long)]
    pub category: Option<ErrorCategory>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

pub fn execute(args: PatternsArgs) -> Result<u8> {
    let registry = PatternRegistry::builtin().context("Failed to build pattern registry")?;
    let heuristics = HeuristicDiagnoser::new();
    let listing = listing(&registry, &heuristics, args.category);

    match args.format {
        OutputFormat::Json => print_json(&listing)?,
        OutputFormat::Text => print_listing(&listing),
    }
    Ok(ExitCodes::SUCCESS)
}

/// Registry and rules in priority order.
fn listing(
    registry: &PatternRegistry,
    heuristics: &HeuristicDiagnoser,
    category: Option<ErrorCategory>,
) -> Value {
    let patterns: Vec<Value> = registry
        .patterns()
        .iter()
        .filter(|p| category.map_or(true, |c| p.category == c))
        .map(|p| {
            json!({
                "key": p.key,
                "signature": p.signature(),
                "category": p.category,
                "matcher": p.matcher.describe(),
                "fixes": p.fixes,
            })
        })
        .collect();

    let rules: Vec<Value> = heuristics
        .rules()
        .iter()
        .filter(|r| category.map_or(true, |c| r.category == c))
        .map(|r| {
            json!({
                "name": r.name,
                "category": r.category,
                "fix": r.fix,
                "confidence": r.confidence,
                "keywords": r.keywords(),
            })
        })
        .collect();

    json!({ "patterns": patterns, "heuristics": rules })
}

fn print_listing(listing: &Value) {
    println!("Patterns (first match wins):");
    for pattern in listing["patterns"].as_array().into_iter().flatten() {
        println!(
            "  {} [{}] {}",
            pattern["key"].as_str().unwrap_or_default(),
            pattern["category"].as_str().unwrap_or_default(),
            pattern["matcher"].as_str().unwrap_or_default()
        );
        for fix in pattern["fixes"].as_array().into_iter().flatten() {
            println!(
                "      {} {:.2}  {}",
                fix["fix"].as_str().unwrap_or_default(),
                fix["confidence"].as_f64().unwrap_or_default(),
                fix["description"].as_str().unwrap_or_default()
            );
        }
    }

    println!();
    println!("Heuristics (used when no pattern matches):");
    for rule in listing["heuristics"].as_array().into_iter().flatten() {
        println!(
            "  {} [{}] → {} {:.2}",
            rule["name"].as_str().unwrap_or_default(),
            rule["category"].as_str().unwrap_or_default(),
            rule["fix"].as_str().unwrap_or_default(),
            rule["confidence"].as_f64().unwrap_or_default()
        );
    }
}
