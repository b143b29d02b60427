//! Pipeline reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mend_patterns::{ClassifiedError, Diagnosis, ErrorCategory, ErrorSignature};

use crate::health::HealthReport;
use crate::phase::PipelinePhase;
use crate::preflight::CheckResult;
use crate::ranking::FixSource;

/// One executed fix command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedFix {
    pub fix_name: String,
    pub command: String,
    pub source: FixSource,
    pub confidence: f64,
    pub description: String,
    pub ok: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The verifying rebuild succeeded
    Resolved,
    /// The rebuild failed with a different signature
    Progressed,
    /// The rebuild failed with the same signature
    Persisted,
    /// Every resolvable fix failed to execute
    FixesFailed,
    NotAutomatable,
    Unclassifiable,
    Cancelled,
}

/// One diagnose-fix-rebuild cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildAttempt {
    pub attempt_number: u32,
    /// Output of the build being remediated
    pub raw_output: String,
    pub signature: Option<ErrorSignature>,
    pub category: Option<ErrorCategory>,
    pub classified_errors: Vec<ClassifiedError>,
    pub heuristic: Option<Diagnosis>,
    pub fixes_applied: Vec<AppliedFix>,
    pub outcome: AttemptOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    PreflightFailed,
    RetriesExhausted,
    SignatureRepeated,
    NotAutomatable,
    FixesFailed,
    Unclassifiable,
    LaunchFailed,
    Cancelled,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreflightFailed => "preflight_failed",
            Self::RetriesExhausted => "retries_exhausted",
            Self::SignatureRepeated => "signature_repeated",
            Self::NotAutomatable => "not_automatable",
            Self::FixesFailed => "fixes_failed",
            Self::Unclassifiable => "unclassifiable",
            Self::LaunchFailed => "launch_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a human is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub reason: EscalationReason,
    /// Phase the pipeline was in when it escalated
    pub phase: PipelinePhase,
    pub message: String,
    pub signature: Option<ErrorSignature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub final_phase: PipelinePhase,
    pub preflight: Vec<CheckResult>,
    pub attempts: Vec<BuildAttempt>,
    pub escalation: Option<Escalation>,
    pub health: Option<HealthReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.final_phase == PipelinePhase::Success
    }

    pub fn degraded(&self) -> bool {
        self.health.as_ref().is_some_and(HealthReport::degraded)
    }

    pub fn fixes_applied(&self) -> usize {
        self.attempts
            .iter()
            .flat_map(|a| &a.fixes_applied)
            .filter(|f| f.ok)
            .count()
    }
}

/// Result of single-shot remediation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationOutcome {
    pub signature: Option<ErrorSignature>,
    pub category: Option<ErrorCategory>,
    /// Every fix command run, in order
    pub attempted: Vec<AppliedFix>,
    /// Set when nothing was applied
    pub reason: Option<EscalationReason>,
}

impl RemediationOutcome {
    /// The fix that executed successfully, if any.
    pub fn applied(&self) -> Option<&AppliedFix> {
        self.attempted.iter().find(|f| f.ok)
    }
}
