//! # mend_core
//!
//! The self-healing build pipeline.
//!
//! # Architecture
//!
//! - **Phases**: PreFlight, BuildRetry, Launch, HealthVerify, then Success
//!   or Escalated, with a checked transition table
//! - **PreFlight**: static project checks that escalate without retrying
//! - **Ranking**: pure diagnosis and fix ordering over patterns, heuristics
//!   and repair memory
//! - **Orchestrator**: runs the phases and applies fixes through the
//!   command runner
//! - **Health**: HTTP, service-count and restart-loop checks after launch
//! - **Events**: JSON-lines audit trail of every diagnosis, fix and
//!   escalation
//! - **Pending**: the fix a single-shot remediation applied, judged by the
//!   next failure or build
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mend_core::{Orchestrator, PipelineConfig};
//! use mend_memory::FileRepairMemory;
//! use mend_runner::ProcessRunner;
//!
//! let config = PipelineConfig::load(&project)?;
//! let memory = Arc::new(FileRepairMemory::for_project(&project)?);
//! let orchestrator = Orchestrator::new(&project, config, Arc::new(ProcessRunner::default()), memory)?;
//!
//! let report = orchestrator.run().await?;
//! if !report.succeeded() {
//!     eprintln!("{:?}", report.escalation);
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod launch;
pub mod orchestrator;
pub mod pending;
pub mod phase;
pub mod preflight;
pub mod ranking;
pub mod report;

pub use config::{state_dir, PipelineConfig, CONFIG_FILE, STATE_DIR};
pub use error::{CoreError, CoreResult};
pub use events::{EventLevel, EventLog, PipelineEvent, EVENTS_FILE};
pub use health::{
    HealthCheck, HealthCheckResult, HealthReport, HttpHealthCheck, RestartLoopCheck,
    ServiceCountCheck,
};
pub use launch::{CommandLauncher, LaunchOutcome, ServiceLauncher};
pub use orchestrator::Orchestrator;
pub use pending::{PendingRemediation, PendingStore, PENDING_FILE};
pub use phase::{PhaseTracker, PhaseTransition, PipelinePhase};
pub use preflight::{
    default_checks, CheckResult, ComposeFileCheck, DockerfileCheck, LockfileFreshnessCheck,
    PackageManifestCheck, PreflightCheck,
};
pub use ranking::{diagnose_output, rank_fixes, DiagnosedFailure, FixSource, RankedFix};
pub use report::{
    AppliedFix, AttemptOutcome, BuildAttempt, Escalation, EscalationReason, PipelineReport,
    RemediationOutcome,
};
