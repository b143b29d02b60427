//! Diagnosis and fix ranking.
//!
//! Pure functions: given build output, a registry, an optional memory entry
//! and a threshold, decide what failed and in which order to try fixes.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mend_memory::RepairMemoryEntry;
use mend_patterns::{
    CandidateFix, ClassifiedError, Diagnosis, ErrorCategory, ErrorSignature, FixKind,
    HeuristicDiagnoser, MatchGroups, PatternRegistry,
};
use mend_runner::CommandSpec;

/// Where a ranked fix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixSource {
    /// Past success for this signature
    Memory,
    /// Registered pattern's static list
    Pattern,
    /// Keyword fallback
    Heuristic,
}

/// What failed, as far as Mend can tell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosedFailure {
    pub signature: ErrorSignature,
    pub category: ErrorCategory,
    pub source: FixSource,
    /// Groups captured by the remediated pattern match
    pub groups: MatchGroups,
    pub candidates: Vec<CandidateFix>,
    /// Every pattern match in the output; empty for heuristic diagnoses
    pub classified: Vec<ClassifiedError>,
    pub heuristic: Option<Diagnosis>,
}

impl DiagnosedFailure {
    pub fn summary(&self) -> String {
        match (&self.heuristic, self.classified.first()) {
            (Some(diagnosis), _) => diagnosis.message.clone(),
            (None, Some(first)) => first.line.clone(),
            (None, None) => self.signature.to_string(),
        }
    }
}

/// Classify output, falling back to heuristics only when no line matches.
///
/// The first matched error in output order is the one remediated.
pub fn diagnose_output(
    registry: &PatternRegistry,
    heuristics: &HeuristicDiagnoser,
    output: &str,
) -> Option<DiagnosedFailure> {
    let classified = registry.classify(output);

    if let Some(first) = classified.first() {
        return Some(DiagnosedFailure {
            signature: first.signature.clone(),
            category: first.category,
            source: FixSource::Pattern,
            groups: first.groups.clone(),
            candidates: first.fixes.clone(),
            classified,
            heuristic: None,
        });
    }

    let diagnosis = heuristics.diagnose(output)?;
    Some(DiagnosedFailure {
        signature: diagnosis.signature(),
        category: diagnosis.category,
        source: FixSource::Heuristic,
        groups: MatchGroups::default(),
        candidates: vec![CandidateFix::new(
            diagnosis.suggested_fix,
            diagnosis.confidence,
            diagnosis.message.clone(),
        )],
        classified: Vec::new(),
        heuristic: Some(diagnosis),
    })
}

/// Signature of a build output, if any.
pub fn signature_of(
    registry: &PatternRegistry,
    heuristics: &HeuristicDiagnoser,
    output: &str,
) -> Option<ErrorSignature> {
    diagnose_output(registry, heuristics, output).map(|d| d.signature)
}

/// A fix in the order it will be tried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedFix {
    pub fix: FixKind,
    pub confidence: f64,
    pub description: String,
    pub source: FixSource,
    /// `None` when the fix is manual or its parameters did not validate
    pub command: Option<CommandSpec>,
}

impl RankedFix {
    pub fn is_resolvable(&self) -> bool {
        self.command.is_some()
    }
}

/// Order candidate fixes for a diagnosed failure.
///
/// A memory entry whose success rate is strictly above `threshold` goes
/// first, ranked by that success rate. The static candidates follow by
/// descending confidence, skipping a fix memory already placed.
pub fn rank_fixes(
    failure: &DiagnosedFailure,
    memory: Option<&RepairMemoryEntry>,
    threshold: f64,
) -> Vec<RankedFix> {
    let mut ranked = Vec::new();

    if let Some(entry) = memory.filter(|e| e.success_rate() > threshold) {
        match entry.fix_name.parse::<FixKind>() {
            Ok(fix) => {
                debug!(
                    "Memory prefers {} for {} (success rate {:.2})",
                    fix,
                    failure.signature,
                    entry.success_rate()
                );
                ranked.push(RankedFix {
                    fix,
                    confidence: entry.success_rate(),
                    description: entry.description.clone(),
                    source: FixSource::Memory,
                    command: fix.resolve(&failure.groups),
                });
            }
            Err(e) => warn!("Ignoring memory entry for {}: {}", failure.signature, e),
        }
    }

    let mut statics = failure.candidates.clone();
    statics.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    for candidate in statics {
        if ranked.iter().any(|r| r.fix.name() == candidate.fix.name()) {
            continue;
        }
        ranked.push(RankedFix {
            fix: candidate.fix,
            confidence: candidate.confidence,
            description: candidate.describe(&failure.groups),
            source: failure.source,
            command: candidate.fix.resolve(&failure.groups),
        });
    }

    ranked
}
