//! Phase orchestrator.
//!
//! Drives one project through PreFlight, BuildRetry, Launch and
//! HealthVerify, ending in Success or Escalated. Every phase change goes
//! through [`PhaseTracker`], so the phase order is enforced rather than
//! assumed.
//!
//! BuildRetry runs a baseline build, then for each attempt:
//!
//! 1. diagnose the failing output (patterns first, heuristics if nothing
//!    matched)
//! 2. rank fixes, memory first when its track record is good enough
//! 3. apply resolvable fixes in order until one executes successfully
//! 4. rebuild to verify, then record the outcome in repair memory
//!
//! A fix "worked" when the verifying rebuild succeeds or no longer shows the
//! signature it targeted. A fix whose command fails is recorded as a failure
//! straight away and the next candidate is tried.
//!
//! Single-shot remediation cannot rebuild, so the fix it applies is parked
//! in a [`PendingStore`] and judged by the same rule on the next
//! remediation or baseline build.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mend_memory::{RepairMemory, RepairOutcome};
use mend_patterns::{ErrorSignature, HeuristicDiagnoser, PatternRegistry};
use mend_runner::{CommandRunner, ExecutionResult, FixExecutor, RunConfig, ServiceStatusSource};

use crate::config::PipelineConfig;
use crate::error::CoreResult;
use crate::events::{EventLevel, EventLog, PipelineEvent};
use crate::health::{self, HealthCheck, HttpHealthCheck, RestartLoopCheck, ServiceCountCheck};
use crate::launch::{CommandLauncher, ServiceLauncher};
use crate::pending::{PendingRemediation, PendingStore};
use crate::phase::{PhaseTracker, PipelinePhase};
use crate::preflight::{default_checks, PreflightCheck};
use crate::ranking::{diagnose_output, rank_fixes, signature_of, DiagnosedFailure, RankedFix};
use crate::report::{
    AppliedFix, AttemptOutcome, BuildAttempt, Escalation, EscalationReason, PipelineReport,
    RemediationOutcome,
};

/// Lines of launch output kept in an escalation message.
const OUTPUT_TAIL_LINES: usize = 20;

enum FixApplication {
    Applied(RankedFix),
    Exhausted,
    Cancelled,
}

pub struct Orchestrator {
    project_root: PathBuf,
    config: PipelineConfig,
    runner: Arc<dyn CommandRunner>,
    memory: Arc<dyn RepairMemory>,
    registry: Arc<PatternRegistry>,
    heuristics: HeuristicDiagnoser,
    executor: FixExecutor,
    launcher: Arc<dyn ServiceLauncher>,
    health_checks: Vec<Arc<dyn HealthCheck>>,
    preflight: Vec<Box<dyn PreflightCheck>>,
    events: EventLog,
    pending: PendingStore,
    cancel: CancellationToken,
    run_id: String,
}

impl Orchestrator {
    /// Build an orchestrator with the built-in registry, default PreFlight
    /// checks, a command launcher and one HTTP check per configured URL.
    pub fn new(
        project_root: impl Into<PathBuf>,
        config: PipelineConfig,
        runner: Arc<dyn CommandRunner>,
        memory: Arc<dyn RepairMemory>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let project_root = project_root.into();

        let launcher = Arc::new(CommandLauncher::new(
            runner.clone(),
            config.launch_spec(&project_root)?,
            config.build_timeout_secs,
        ));
        let health_checks = config
            .health_urls
            .iter()
            .map(|url| {
                Arc::new(HttpHealthCheck::new(url, config.health_timeout_secs)) as Arc<dyn HealthCheck>
            })
            .collect();
        let executor = FixExecutor::new(runner.clone())
            .with_timeout(config.fix_timeout_secs)
            .with_workdir(&project_root);

        Ok(Self {
            preflight: default_checks(&config),
            registry: Arc::new(PatternRegistry::builtin()?),
            heuristics: HeuristicDiagnoser::new(),
            events: EventLog::in_memory(),
            pending: PendingStore::in_memory(),
            cancel: CancellationToken::new(),
            run_id: Uuid::new_v4().to_string(),
            project_root,
            config,
            runner,
            memory,
            executor,
            launcher,
            health_checks,
        })
    }

    pub fn with_registry(mut self, registry: PatternRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ServiceLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_health_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.health_checks.push(check);
        self
    }

    /// Add service-count (when `expected_services` is set) and restart-loop
    /// checks backed by `source`.
    pub fn with_service_status(mut self, source: Arc<dyn ServiceStatusSource>) -> Self {
        if let Some(expected) = self.config.expected_services {
            self.health_checks
                .push(Arc::new(ServiceCountCheck::new(source.clone(), expected)));
        }
        self.health_checks.push(Arc::new(RestartLoopCheck::new(source)));
        self
    }

    pub fn with_preflight_checks(mut self, checks: Vec<Box<dyn PreflightCheck>>) -> Self {
        self.preflight = checks;
        self
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn with_pending_store(mut self, pending: PendingStore) -> Self {
        self.pending = pending;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Diagnose output without side effects.
    pub fn diagnose(&self, output: &str) -> Option<DiagnosedFailure> {
        diagnose_output(&self.registry, &self.heuristics, output)
    }

    /// Rank fixes for a failure, consulting repair memory.
    pub fn rank(&self, failure: &DiagnosedFailure) -> Vec<RankedFix> {
        let entry = match self.memory.lookup(&failure.signature) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Repair memory lookup failed for {}: {}", failure.signature, e);
                None
            }
        };
        rank_fixes(failure, entry.as_ref(), self.config.memory_threshold)
    }

    /// Run the full pipeline.
    pub async fn run(&self) -> CoreResult<PipelineReport> {
        let started_at = Utc::now();
        let mut tracker = PhaseTracker::new();
        let mut report = PipelineReport {
            run_id: self.run_id.clone(),
            final_phase: PipelinePhase::PreFlight,
            preflight: Vec::new(),
            attempts: Vec::new(),
            escalation: None,
            health: None,
            started_at,
            finished_at: started_at,
        };

        info!("Starting pipeline {} for {}", self.run_id, self.project_root.display());

        // PreFlight
        if self.config.skip_preflight {
            self.emit(PipelinePhase::PreFlight, EventLevel::Info, "PreFlight skipped", None, None);
        } else {
            report.preflight = self
                .preflight
                .iter()
                .map(|check| {
                    debug!("PreFlight check: {}", check.description());
                    check.check(&self.project_root)
                })
                .collect();

            let failures: Vec<String> = report
                .preflight
                .iter()
                .filter(|r| !r.passed)
                .map(|r| format!("{}: {}", r.check, r.message))
                .collect();
            if !failures.is_empty() {
                let escalation = Escalation {
                    reason: EscalationReason::PreflightFailed,
                    phase: PipelinePhase::PreFlight,
                    message: failures.join("; "),
                    signature: None,
                };
                return self.finish_escalated(&mut tracker, report, escalation);
            }
            self.emit(PipelinePhase::PreFlight, EventLevel::Info, "PreFlight passed", None, None);
        }

        // BuildRetry
        tracker.advance(PipelinePhase::BuildRetry)?;
        if let Err(escalation) = self.build_retry(&mut report.attempts).await? {
            return self.finish_escalated(&mut tracker, report, escalation);
        }

        // Launch
        tracker.advance(PipelinePhase::Launch)?;
        if self.cancel.is_cancelled() {
            let escalation = self.cancelled(PipelinePhase::Launch);
            return self.finish_escalated(&mut tracker, report, escalation);
        }
        let launch_failure = match self.launcher.launch().await {
            Ok(outcome) if outcome.ok => None,
            Ok(outcome) => Some(format!("Launch command failed:\n{}", tail(&outcome.output, OUTPUT_TAIL_LINES))),
            Err(e) => Some(format!("Launch could not start: {}", e)),
        };
        if let Some(message) = launch_failure {
            let escalation = Escalation {
                reason: EscalationReason::LaunchFailed,
                phase: PipelinePhase::Launch,
                message,
                signature: None,
            };
            return self.finish_escalated(&mut tracker, report, escalation);
        }
        self.emit(PipelinePhase::Launch, EventLevel::Info, "Services launched", None, None);

        // HealthVerify
        tracker.advance(PipelinePhase::HealthVerify)?;
        let settle = Duration::from_secs(self.config.settle_delay_secs);
        if !settle.is_zero() {
            debug!("Waiting {}s for services to settle", settle.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(settle) => {}
                _ = self.cancel.cancelled() => {
                    let escalation = self.cancelled(PipelinePhase::HealthVerify);
                    return self.finish_escalated(&mut tracker, report, escalation);
                }
            }
        }
        let health = health::verify(&self.health_checks).await;
        if health.degraded() {
            for failure in health.failures() {
                self.emit(
                    PipelinePhase::HealthVerify,
                    EventLevel::Warn,
                    &format!("Degraded: {}: {}", failure.name, failure.message),
                    None,
                    None,
                );
            }
        } else {
            self.emit(PipelinePhase::HealthVerify, EventLevel::Info, "All health checks passed", None, None);
        }
        report.health = Some(health);

        tracker.advance(PipelinePhase::Success)?;
        report.final_phase = PipelinePhase::Success;
        report.finished_at = Utc::now();
        info!(
            "Pipeline {} succeeded after {} attempt(s){}",
            self.run_id,
            report.attempts.len(),
            if report.degraded() { " (degraded)" } else { "" }
        );
        Ok(report)
    }

    /// Classify `output` and apply the best resolvable fix once.
    ///
    /// The fix applied last time is settled first: `output` still showing
    /// its signature counts against it, anything else for it. The fix applied
    /// now is parked for the next call. Fixes whose command fails are
    /// recorded straight away.
    pub async fn remediate_once(&self, output: &str) -> RemediationOutcome {
        let mut outcome = RemediationOutcome {
            signature: None,
            category: None,
            attempted: Vec::new(),
            reason: None,
        };

        let diagnosed = self.diagnose(output);
        self.settle_pending(diagnosed.as_ref().map(|f| &f.signature));

        let Some(failure) = diagnosed else {
            warn!("Output is unclassifiable");
            outcome.reason = Some(EscalationReason::Unclassifiable);
            return outcome;
        };
        info!("Diagnosed {}: {}", failure.signature, failure.summary());
        outcome.signature = Some(failure.signature.clone());
        outcome.category = Some(failure.category);

        let ranked = self.rank(&failure);
        let resolvable: Vec<&RankedFix> = ranked.iter().filter(|r| r.is_resolvable()).collect();
        if resolvable.is_empty() {
            warn!("{} is recognized but not automatable", failure.signature);
            outcome.reason = Some(EscalationReason::NotAutomatable);
            return outcome;
        }

        let application = self
            .apply_fixes(&failure, &resolvable, &mut outcome.attempted, None)
            .await;
        outcome.reason = match application {
            FixApplication::Applied(fix) => {
                self.pending.park(PendingRemediation {
                    signature: failure.signature.clone(),
                    category: failure.category,
                    fix_name: fix.fix.name().to_string(),
                    confidence: fix.confidence.clamp(0.0, 1.0),
                    description: fix.description.clone(),
                    applied_at: Utc::now(),
                });
                None
            }
            FixApplication::Exhausted => Some(EscalationReason::FixesFailed),
            FixApplication::Cancelled => Some(EscalationReason::Cancelled),
        };
        outcome
    }

    /// Record the verdict on a parked single-shot fix, given the signature
    /// the build fails with now (`None` when green or unclassifiable).
    fn settle_pending(&self, current: Option<&ErrorSignature>) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let verdict = pending.verdict(current);
        info!("Earlier {} for {}: {:?}", pending.fix_name, pending.signature, verdict);
        if let Err(e) = self.memory.record(
            &pending.signature,
            &pending.fix_name,
            pending.confidence,
            pending.category,
            &pending.description,
            verdict,
        ) {
            warn!("Failed to record repair memory for {}: {}", pending.signature, e);
        }
    }

    /// `Ok(Ok(()))` when the build is green, `Ok(Err(_))` when escalating.
    async fn build_retry(
        &self,
        attempts: &mut Vec<BuildAttempt>,
    ) -> CoreResult<Result<(), Escalation>> {
        let phase = PipelinePhase::BuildRetry;

        let Some(mut result) = self.build().await? else {
            return Ok(Err(self.cancelled(phase)));
        };
        if result.success() {
            self.settle_pending(None);
            self.emit(phase, EventLevel::Info, "Build succeeded", None, None);
            return Ok(Ok(()));
        }
        self.settle_pending(
            signature_of(&self.registry, &self.heuristics, &result.combined_output()).as_ref(),
        );
        self.emit(
            phase,
            EventLevel::Warn,
            &format!("Build failed with exit code {}", result.exit_code),
            None,
            None,
        );

        let mut persisted: HashMap<ErrorSignature, u32> = HashMap::new();

        for attempt_number in 1..=self.config.max_retries {
            let output = result.combined_output();
            let started_at = Utc::now();
            let mut attempt = BuildAttempt {
                attempt_number,
                raw_output: output.clone(),
                signature: None,
                category: None,
                classified_errors: Vec::new(),
                heuristic: None,
                fixes_applied: Vec::new(),
                outcome: AttemptOutcome::Unclassifiable,
                started_at,
                finished_at: started_at,
            };

            let Some(failure) = self.diagnose(&output) else {
                attempts.push(finish(attempt, AttemptOutcome::Unclassifiable));
                return Ok(Err(self.escalation(
                    EscalationReason::Unclassifiable,
                    "Build output matched no pattern or heuristic".to_string(),
                    None,
                )));
            };

            attempt.signature = Some(failure.signature.clone());
            attempt.category = Some(failure.category);
            attempt.classified_errors = failure.classified.clone();
            attempt.heuristic = failure.heuristic.clone();
            self.emit(
                phase,
                EventLevel::Info,
                &format!("Diagnosed {}: {}", failure.signature, failure.summary()),
                Some(attempt_number),
                Some(&failure.signature),
            );

            let ranked = self.rank(&failure);
            let resolvable: Vec<&RankedFix> = ranked.iter().filter(|r| r.is_resolvable()).collect();
            if resolvable.is_empty() {
                attempts.push(finish(attempt, AttemptOutcome::NotAutomatable));
                return Ok(Err(self.escalation(
                    EscalationReason::NotAutomatable,
                    format!("Recognized but not automatable: {}", failure.summary()),
                    Some(failure.signature.clone()),
                )));
            }

            let application = self
                .apply_fixes(&failure, &resolvable, &mut attempt.fixes_applied, Some(attempt_number))
                .await;
            let applied = match application {
                FixApplication::Applied(fix) => fix,
                FixApplication::Exhausted => {
                    attempts.push(finish(attempt, AttemptOutcome::FixesFailed));
                    return Ok(Err(self.escalation(
                        EscalationReason::FixesFailed,
                        format!("No fix for {} executed successfully", failure.signature),
                        Some(failure.signature.clone()),
                    )));
                }
                FixApplication::Cancelled => {
                    attempts.push(finish(attempt, AttemptOutcome::Cancelled));
                    return Ok(Err(self.cancelled(phase)));
                }
            };

            // Verify the fix with a rebuild.
            let Some(rebuilt) = self.build().await? else {
                attempts.push(finish(attempt, AttemptOutcome::Cancelled));
                return Ok(Err(self.cancelled(phase)));
            };

            if rebuilt.success() {
                self.remember(&failure, &applied, RepairOutcome::Success);
                attempts.push(finish(attempt, AttemptOutcome::Resolved));
                self.emit(
                    phase,
                    EventLevel::Info,
                    &format!("Build succeeded after {}", applied.fix),
                    Some(attempt_number),
                    Some(&failure.signature),
                );
                return Ok(Ok(()));
            }

            let next_signature = signature_of(&self.registry, &self.heuristics, &rebuilt.combined_output());
            let outcome = if next_signature.as_ref() == Some(&failure.signature) {
                self.remember(&failure, &applied, RepairOutcome::Failure);
                AttemptOutcome::Persisted
            } else {
                self.remember(&failure, &applied, RepairOutcome::Success);
                AttemptOutcome::Progressed
            };
            self.emit(
                phase,
                EventLevel::Warn,
                &match outcome {
                    AttemptOutcome::Persisted => format!("{} persists after {}", failure.signature, applied.fix),
                    _ => format!("{} cleared, build still failing", failure.signature),
                },
                Some(attempt_number),
                Some(&failure.signature),
            );
            attempts.push(finish(attempt, outcome));
            result = rebuilt;

            if outcome == AttemptOutcome::Persisted {
                let count = persisted.entry(failure.signature.clone()).or_insert(0);
                *count += 1;
                if *count >= self.config.max_attempts_per_signature
                    && attempt_number < self.config.max_retries
                {
                    return Ok(Err(self.escalation(
                        EscalationReason::SignatureRepeated,
                        format!("{} persisted through {} fix attempts", failure.signature, count),
                        Some(failure.signature.clone()),
                    )));
                }
            }
        }

        let last_signature = signature_of(&self.registry, &self.heuristics, &result.combined_output());
        Ok(Err(self.escalation(
            EscalationReason::RetriesExhausted,
            format!("Build still failing after {} attempts", self.config.max_retries),
            last_signature,
        )))
    }

    /// Try resolvable fixes in rank order until one executes successfully.
    async fn apply_fixes(
        &self,
        failure: &DiagnosedFailure,
        resolvable: &[&RankedFix],
        log: &mut Vec<AppliedFix>,
        attempt: Option<u32>,
    ) -> FixApplication {
        for fix in resolvable {
            if self.cancel.is_cancelled() {
                return FixApplication::Cancelled;
            }
            let Some(command) = &fix.command else {
                continue;
            };

            let outcome = self.executor.execute_fix(command).await;
            let applied = AppliedFix {
                fix_name: fix.fix.name().to_string(),
                command: command.display(),
                source: fix.source,
                confidence: fix.confidence,
                description: fix.description.clone(),
                ok: outcome.ok,
                error: outcome.error.clone(),
                duration_ms: outcome.duration_ms,
                applied_at: Utc::now(),
            };

            if outcome.ok {
                self.emit(
                    PipelinePhase::BuildRetry,
                    EventLevel::Info,
                    &format!("Applied {} ({}): {}", fix.fix, applied.command, fix.description),
                    attempt,
                    Some(&failure.signature),
                );
                log.push(applied);
                return FixApplication::Applied((*fix).clone());
            }

            self.emit(
                PipelinePhase::BuildRetry,
                EventLevel::Warn,
                &format!(
                    "Fix {} failed: {}",
                    fix.fix,
                    outcome.error.as_deref().unwrap_or("unknown error")
                ),
                attempt,
                Some(&failure.signature),
            );
            log.push(applied);
            self.remember(failure, fix, RepairOutcome::Failure);
        }
        FixApplication::Exhausted
    }

    /// Run the build. `None` when cancelled mid-build.
    async fn build(&self) -> CoreResult<Option<ExecutionResult>> {
        let spec = self.config.build_spec(&self.project_root)?;
        let run_config = RunConfig::default().timeout(self.config.build_timeout_secs);
        info!("Building: {}", spec);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!("Build cancelled");
                Ok(None)
            }
            result = self.runner.run(&spec, &run_config) => Ok(Some(result?)),
        }
    }

    fn remember(&self, failure: &DiagnosedFailure, fix: &RankedFix, outcome: RepairOutcome) {
        if self.cancel.is_cancelled() {
            debug!("Cancelled; not recording {:?} for {}", outcome, failure.signature);
            return;
        }
        if let Err(e) = self.memory.record(
            &failure.signature,
            fix.fix.name(),
            fix.confidence.clamp(0.0, 1.0),
            failure.category,
            &fix.description,
            outcome,
        ) {
            warn!("Failed to record repair memory for {}: {}", failure.signature, e);
        }
    }

    fn escalation(
        &self,
        reason: EscalationReason,
        message: String,
        signature: Option<ErrorSignature>,
    ) -> Escalation {
        Escalation {
            reason,
            phase: PipelinePhase::BuildRetry,
            message,
            signature,
        }
    }

    fn cancelled(&self, phase: PipelinePhase) -> Escalation {
        Escalation {
            reason: EscalationReason::Cancelled,
            phase,
            message: "Run cancelled".to_string(),
            signature: None,
        }
    }

    fn finish_escalated(
        &self,
        tracker: &mut PhaseTracker,
        mut report: PipelineReport,
        escalation: Escalation,
    ) -> CoreResult<PipelineReport> {
        tracker.advance(PipelinePhase::Escalated)?;
        error!(
            "Escalating from {} ({}): {}",
            escalation.phase, escalation.reason, escalation.message
        );
        self.emit(
            escalation.phase,
            EventLevel::Error,
            &format!("Escalated ({}): {}", escalation.reason, escalation.message),
            report.attempts.last().map(|a| a.attempt_number),
            escalation.signature.as_ref(),
        );
        report.final_phase = PipelinePhase::Escalated;
        report.escalation = Some(escalation);
        report.finished_at = Utc::now();
        Ok(report)
    }

    fn emit(
        &self,
        phase: PipelinePhase,
        level: EventLevel,
        message: &str,
        attempt: Option<u32>,
        signature: Option<&ErrorSignature>,
    ) {
        match level {
            EventLevel::Info => info!(phase = %phase, attempt, "{}", message),
            EventLevel::Warn => warn!(phase = %phase, attempt, "{}", message),
            EventLevel::Error => error!(phase = %phase, attempt, "{}", message),
        }
        self.events.append(PipelineEvent {
            timestamp: Utc::now(),
            run_id: self.run_id.clone(),
            phase,
            level,
            message: message.to_string(),
            attempt,
            signature: signature.map(ToString::to_string),
        });
    }
}

fn finish(mut attempt: BuildAttempt, outcome: AttemptOutcome) -> BuildAttempt {
    attempt.outcome = outcome;
    attempt.finished_at = Utc::now();
    attempt
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
