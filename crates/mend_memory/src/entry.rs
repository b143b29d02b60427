//! Repair memory records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mend_patterns::{ErrorCategory, ErrorSignature};

/// Whether an applied fix cleared its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairOutcome {
    Success,
    Failure,
}

/// Accumulated evidence for one error signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairMemoryEntry {
    pub signature: ErrorSignature,
    /// Fix the counts describe. Another fix replaces it only by succeeding.
    pub fix_name: String,
    pub confidence: f64,
    pub category: ErrorCategory,
    pub description: String,
    pub success_count: u32,
    pub failure_count: u32,
    pub last_used_at: DateTime<Utc>,
}

impl RepairMemoryEntry {
    pub fn new(
        signature: ErrorSignature,
        fix_name: impl Into<String>,
        confidence: f64,
        category: ErrorCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            signature,
            fix_name: fix_name.into(),
            confidence,
            category,
            description: description.into(),
            success_count: 0,
            failure_count: 0,
            last_used_at: Utc::now(),
        }
    }

    /// `success / (success + failure)`, 0.0 with no evidence.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.0
        } else {
            f64::from(self.success_count) / f64::from(total)
        }
    }

    pub fn total_uses(&self) -> u32 {
        self.success_count + self.failure_count
    }

    /// Fold one remediation into this entry.
    ///
    /// Counts always describe `fix_name`. A different fix that succeeds
    /// takes the entry over with a fresh record; a different fix that fails
    /// leaves the current fix and its record alone.
    pub(crate) fn apply(
        &mut self,
        fix_name: &str,
        confidence: f64,
        category: ErrorCategory,
        description: &str,
        outcome: RepairOutcome,
    ) {
        if self.fix_name != fix_name {
            if outcome == RepairOutcome::Failure {
                return;
            }
            self.fix_name = fix_name.to_string();
            self.success_count = 0;
            self.failure_count = 0;
        }
        self.confidence = confidence;
        self.category = category;
        self.description = description.to_string();
        match outcome {
            RepairOutcome::Success => self.success_count += 1,
            RepairOutcome::Failure => self.failure_count += 1,
        }
        self.last_used_at = Utc::now();
    }
}
