//! Pipeline behaviour against scripted builds.
//!
//! The build tool, fix commands and launch command are all answered by a
//! `MockRunner`; repair memory is in-memory unless a test needs the file.

use std::sync::Arc;

use async_trait::async_trait;
use mockall::mock;
use tempfile::TempDir;

use tokio_util::sync::CancellationToken;

use mend_core::{
    AttemptOutcome, CoreResult, EscalationReason, EventLog, FixSource, HealthCheck,
    HealthCheckResult, LaunchOutcome, Orchestrator, PendingStore, PipelineConfig, PipelinePhase,
    ServiceLauncher, PENDING_FILE,
};
use mend_memory::{FileRepairMemory, InMemoryRepairMemory, RepairMemory, RepairMemoryEntry};
use mend_patterns::{ErrorCategory, ErrorSignature};
use mend_runner::{
    CommandRunner, CommandSpec, ExecutionResult, MockResponse, MockRunner, RunConfig, RunnerResult,
};

mock! {
    Launcher {}

    #[async_trait]
    impl ServiceLauncher for Launcher {
        async fn launch(&self) -> CoreResult<LaunchOutcome>;
    }
}

mock! {
    Probe {}

    #[async_trait]
    impl HealthCheck for Probe {
        fn name(&self) -> String;
        async fn check(&self) -> HealthCheckResult;
    }
}

/// Cancels `cancel` when a command containing `trigger` runs, then lets it
/// finish normally.
struct CancelOnCommand {
    inner: MockRunner,
    trigger: &'static str,
    cancel: CancellationToken,
}

#[async_trait]
impl CommandRunner for CancelOnCommand {
    async fn is_available(&self, program: &str) -> RunnerResult<bool> {
        self.inner.is_available(program).await
    }

    async fn run(&self, spec: &CommandSpec, run_config: &RunConfig) -> RunnerResult<ExecutionResult> {
        if spec.display().contains(self.trigger) {
            self.cancel.cancel();
        }
        self.inner.run(spec, run_config).await
    }
}

const ERESOLVE: &str = "\
npm ERR! code ERESOLVE
npm ERR! ERESOLVE unable to resolve dependency tree
npm ERR! Found: react@18.2.0";

const NO_SPACE: &str = "#7 ERROR: failed to copy: write /var/lib/docker/tmp/buildkit: no space left on device";

const MISSING_MODULE: &str = "Error: Cannot find module 'express'\nRequire stack:\n- /app/server.js";

fn config() -> PipelineConfig {
    PipelineConfig {
        settle_delay_secs: 0,
        skip_preflight: true,
        ..Default::default()
    }
}

fn build_fails_with(outputs: &[&str]) -> MockRunner {
    let mut responses: Vec<MockResponse> =
        outputs.iter().map(|o| MockResponse::failure(1, *o)).collect();
    responses.push(MockResponse::success("build complete"));
    MockRunner::new().on("npm run build", responses)
}

fn orchestrator(runner: &MockRunner, memory: Arc<dyn RepairMemory>) -> Orchestrator {
    Orchestrator::new("/project", config(), Arc::new(runner.clone()), memory).unwrap()
}

/// A dependency conflict with no registered pattern is healed via the heuristic.
#[tokio::test]
async fn test_scenario_a_eresolve_uses_legacy_peer_deps() {
    let runner = build_fails_with(&[ERESOLVE]);
    let memory = Arc::new(InMemoryRepairMemory::new());
    let orch = orchestrator(&runner, memory.clone());

    let failure = orch.diagnose(ERESOLVE).unwrap();
    assert_eq!(failure.category, ErrorCategory::Lockfile);
    assert_eq!(failure.candidates[0].fix.name(), "install_legacy_peer_deps");
    assert_eq!(failure.candidates[0].confidence, 0.85);

    let report = orch.run().await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].outcome, AttemptOutcome::Resolved);
    assert_eq!(report.attempts[0].fixes_applied[0].source, FixSource::Heuristic);
    assert!(runner.was_called("npm install --legacy-peer-deps"));

    let entry = memory
        .lookup(&ErrorSignature::heuristic(ErrorCategory::Lockfile))
        .unwrap()
        .unwrap();
    assert_eq!(entry.success_count, 1);
    assert_eq!(entry.fix_name, "install_legacy_peer_deps");
}

/// Disk exhaustion is cleared with a Docker prune, never a file deletion.
#[tokio::test]
async fn test_scenario_b_disk_exhaustion_prunes() {
    let runner = build_fails_with(&[NO_SPACE]);
    let orch = orchestrator(&runner, Arc::new(InMemoryRepairMemory::new()));

    let failure = orch.diagnose(NO_SPACE).unwrap();
    assert_eq!(failure.category, ErrorCategory::Container);
    assert_eq!(failure.candidates[0].fix.name(), "docker_prune");
    assert_eq!(failure.candidates[0].confidence, 0.95);

    let report = orch.run().await.unwrap();

    assert!(report.succeeded());
    let commands = runner.commands();
    assert!(commands.contains(&"docker system prune -f".to_string()));
    assert!(commands.iter().all(|c| !c.starts_with("rm ")));
}

/// The same signature surviving every fix escalates at the attempt bound.
#[tokio::test]
async fn test_scenario_c_repeated_signature_escalates() {
    let runner = MockRunner::new().on("npm run build", vec![MockResponse::failure(1, NO_SPACE)]);
    let memory = Arc::new(InMemoryRepairMemory::new());
    let orch = orchestrator(&runner, memory.clone());

    let report = orch.run().await.unwrap();

    assert_eq!(report.final_phase, PipelinePhase::Escalated);
    assert_eq!(report.attempts.len(), 3);
    assert_eq!(report.attempts.last().unwrap().attempt_number, 3);
    assert!(report
        .attempts
        .iter()
        .all(|a| a.outcome == AttemptOutcome::Persisted));

    let escalation = report.escalation.unwrap();
    assert_eq!(escalation.reason, EscalationReason::RetriesExhausted);
    assert_eq!(escalation.phase, PipelinePhase::BuildRetry);

    let signature = ErrorSignature::for_pattern(ErrorCategory::Container, "docker_no_space");
    let entry = memory.lookup(&signature).unwrap().unwrap();
    assert!(entry.failure_count >= 3);
    assert_eq!(entry.success_count, 0);

    // Baseline build plus one verifying rebuild per attempt; no launch.
    assert_eq!(runner.count_calls("npm run build"), 4);
    assert!(!runner.was_called("docker compose up"));
}

/// Memory with a strong track record outranks the static list.
#[tokio::test]
async fn test_scenario_d_memory_fix_attempted_first() {
    let signature = ErrorSignature::for_pattern(ErrorCategory::Dependency, "node_module_not_found");
    let mut entry = RepairMemoryEntry::new(
        signature.clone(),
        "reinstall_dependencies",
        0.7,
        ErrorCategory::Dependency,
        "Reinstall dependencies",
    );
    entry.success_count = 9;
    entry.failure_count = 1;
    let memory = Arc::new(InMemoryRepairMemory::new().with_entry(entry));

    let runner = build_fails_with(&[MISSING_MODULE]);
    let orch = orchestrator(&runner, memory.clone());

    let report = orch.run().await.unwrap();

    assert!(report.succeeded());
    let applied = &report.attempts[0].fixes_applied[0];
    assert_eq!(applied.fix_name, "reinstall_dependencies");
    assert_eq!(applied.source, FixSource::Memory);
    assert!(!runner.was_called("npm install express"));
    assert_eq!(memory.lookup(&signature).unwrap().unwrap().success_count, 10);
}

/// No matter how many fixes resolve, attempts stay within the bound.
#[tokio::test]
async fn test_attempts_never_exceed_max_retries() {
    let outputs = [
        NO_SPACE,
        ERESOLVE,
        MISSING_MODULE,
        "gyp ERR! build error",
        "npm ERR! code ETIMEDOUT",
    ];
    let runner = build_fails_with(&outputs);
    let config = PipelineConfig {
        max_retries: 2,
        ..config()
    };
    let orch = Orchestrator::new(
        "/project",
        config,
        Arc::new(runner.clone()),
        Arc::new(InMemoryRepairMemory::new()),
    )
    .unwrap();

    let report = orch.run().await.unwrap();

    assert_eq!(report.final_phase, PipelinePhase::Escalated);
    assert_eq!(report.attempts.len(), 2);
    assert!(report
        .attempts
        .iter()
        .all(|a| a.outcome == AttemptOutcome::Progressed));
    assert_eq!(
        report.escalation.unwrap().reason,
        EscalationReason::RetriesExhausted
    );
}

/// A lower per-signature cap escalates before the retry budget is spent.
#[tokio::test]
async fn test_signature_cap_escalates_early() {
    let runner = MockRunner::new().on("npm run build", vec![MockResponse::failure(1, NO_SPACE)]);
    let config = PipelineConfig {
        max_attempts_per_signature: 2,
        max_retries: 5,
        ..config()
    };
    let orch = Orchestrator::new(
        "/project",
        config,
        Arc::new(runner.clone()),
        Arc::new(InMemoryRepairMemory::new()),
    )
    .unwrap();

    let report = orch.run().await.unwrap();

    assert_eq!(report.attempts.len(), 2);
    assert_eq!(
        report.escalation.unwrap().reason,
        EscalationReason::SignatureRepeated
    );
}

/// The default per-signature cap escalates once the retry budget exceeds it.
#[tokio::test]
async fn test_default_signature_cap_below_larger_retry_budget() {
    let runner = MockRunner::new().on("npm run build", vec![MockResponse::failure(1, NO_SPACE)]);
    let config = PipelineConfig {
        max_retries: 4,
        ..config()
    };
    assert_eq!(config.max_attempts_per_signature, 3);
    let orch = Orchestrator::new(
        "/project",
        config,
        Arc::new(runner.clone()),
        Arc::new(InMemoryRepairMemory::new()),
    )
    .unwrap();

    let report = orch.run().await.unwrap();

    assert_eq!(report.attempts.len(), 3);
    let escalation = report.escalation.unwrap();
    assert_eq!(escalation.reason, EscalationReason::SignatureRepeated);
    assert_eq!(
        escalation.signature,
        Some(ErrorSignature::for_pattern(ErrorCategory::Container, "docker_no_space"))
    );
}

/// PreFlight failures escalate before any build runs.
#[tokio::test]
async fn test_preflight_failure_consumes_no_attempts() {
    let project = TempDir::new().unwrap();
    std::fs::write(project.path().join("package.json"), "{ broken").unwrap();
    std::fs::write(project.path().join("package-lock.json"), "{}").unwrap();

    let runner = MockRunner::new();
    let config = PipelineConfig {
        skip_preflight: false,
        skip_lockcheck: true,
        ..config()
    };
    let orch = Orchestrator::new(
        project.path(),
        config,
        Arc::new(runner.clone()),
        Arc::new(InMemoryRepairMemory::new()),
    )
    .unwrap();

    let report = orch.run().await.unwrap();

    assert_eq!(report.final_phase, PipelinePhase::Escalated);
    assert!(report.attempts.is_empty());
    assert_eq!(runner.call_count(), 0);
    let escalation = report.escalation.unwrap();
    assert_eq!(escalation.reason, EscalationReason::PreflightFailed);
    assert_eq!(escalation.phase, PipelinePhase::PreFlight);
    assert!(escalation.message.contains("package-manifest"));
}

/// Output nothing recognizes escalates immediately.
#[tokio::test]
async fn test_unclassifiable_output_escalates() {
    let runner = build_fails_with(&["Segmentation fault (core dumped)"]);
    let orch = orchestrator(&runner, Arc::new(InMemoryRepairMemory::new()));

    let report = orch.run().await.unwrap();

    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].outcome, AttemptOutcome::Unclassifiable);
    assert_eq!(
        report.escalation.unwrap().reason,
        EscalationReason::Unclassifiable
    );
    assert_eq!(runner.call_count(), 1);
}

/// A recognized error with only manual fixes escalates without running anything.
#[tokio::test]
async fn test_manual_only_fix_is_not_automatable() {
    let runner = build_fails_with(&["npm ERR! code EACCES\nnpm ERR! syscall mkdir"]);
    let orch = orchestrator(&runner, Arc::new(InMemoryRepairMemory::new()));

    let report = orch.run().await.unwrap();

    assert_eq!(
        report.escalation.unwrap().reason,
        EscalationReason::NotAutomatable
    );
    assert!(report.attempts[0].fixes_applied.is_empty());
    assert_eq!(runner.call_count(), 1);
}

/// A failing fix command falls through to the next candidate.
#[tokio::test]
async fn test_failed_fix_falls_through_to_next_candidate() {
    let runner = build_fails_with(&[MISSING_MODULE])
        .on("npm install express", vec![MockResponse::failure(1, "E404 Not Found")]);
    let memory = Arc::new(InMemoryRepairMemory::new());
    let orch = orchestrator(&runner, memory.clone());

    let report = orch.run().await.unwrap();

    assert!(report.succeeded());
    let fixes = &report.attempts[0].fixes_applied;
    assert_eq!(fixes.len(), 2);
    assert!(!fixes[0].ok);
    assert_eq!(fixes[0].error.as_deref(), Some("exited with code 1"));
    assert!(fixes[1].ok);
    assert_eq!(fixes[1].fix_name, "reinstall_dependencies");

    // Only the fix that worked is on record.
    let entry = memory
        .lookup(&ErrorSignature::for_pattern(ErrorCategory::Dependency, "node_module_not_found"))
        .unwrap()
        .unwrap();
    assert_eq!(entry.fix_name, "reinstall_dependencies");
    assert_eq!(entry.success_count, 1);
    assert_eq!(entry.failure_count, 0);
}

/// A remembered fix that stops working is replaced, and its track record
/// does not carry over to the replacement.
#[tokio::test]
async fn test_replaced_memory_fix_does_not_inherit_record() {
    let signature = ErrorSignature::for_pattern(ErrorCategory::Dependency, "node_module_not_found");
    let mut entry = RepairMemoryEntry::new(
        signature.clone(),
        "reinstall_dependencies",
        0.7,
        ErrorCategory::Dependency,
        "Reinstall dependencies",
    );
    entry.success_count = 9;
    let memory = Arc::new(InMemoryRepairMemory::new().with_entry(entry));

    let runner = build_fails_with(&[MISSING_MODULE])
        .on("npm install express", vec![MockResponse::success("added 1 package")])
        .on("npm install", vec![MockResponse::failure(1, "ENOTEMPTY")]);
    let orch = orchestrator(&runner, memory.clone());

    let report = orch.run().await.unwrap();

    assert!(report.succeeded());
    let fixes = &report.attempts[0].fixes_applied;
    assert_eq!(fixes[0].fix_name, "reinstall_dependencies");
    assert_eq!(fixes[0].source, FixSource::Memory);
    assert!(!fixes[0].ok);
    assert_eq!(fixes[1].fix_name, "install_missing_package");
    assert!(fixes[1].ok);

    let entry = memory.lookup(&signature).unwrap().unwrap();
    assert_eq!(entry.fix_name, "install_missing_package");
    assert_eq!(entry.success_count, 1);
    assert_eq!(entry.failure_count, 0);
    assert_eq!(entry.success_rate(), 1.0);
}

/// Launch failure escalates after a green build.
#[tokio::test]
async fn test_launch_failure_escalates() {
    let mut launcher = MockLauncher::new();
    launcher.expect_launch().times(1).returning(|| {
        Ok(LaunchOutcome {
            ok: false,
            output: "Error response from daemon: port is already allocated".to_string(),
        })
    });

    let runner = MockRunner::new();
    let orch = orchestrator(&runner, Arc::new(InMemoryRepairMemory::new()))
        .with_launcher(Arc::new(launcher));

    let report = orch.run().await.unwrap();

    let escalation = report.escalation.unwrap();
    assert_eq!(escalation.reason, EscalationReason::LaunchFailed);
    assert_eq!(escalation.phase, PipelinePhase::Launch);
    assert!(escalation.message.contains("already allocated"));
    assert!(report.health.is_none());
}

/// Failing health checks degrade the run but do not fail it.
#[tokio::test]
async fn test_health_failure_is_degraded_success() {
    let mut probe = MockProbe::new();
    probe
        .expect_check()
        .times(1)
        .returning(|| HealthCheckResult::unhealthy("http api", "status 503"));

    let runner = MockRunner::new();
    let orch = orchestrator(&runner, Arc::new(InMemoryRepairMemory::new()))
        .with_health_check(Arc::new(probe));

    let report = orch.run().await.unwrap();

    assert_eq!(report.final_phase, PipelinePhase::Success);
    assert!(report.degraded());
    assert!(report.escalation.is_none());
}

/// Cancellation stops before any fix is applied and records nothing.
#[tokio::test]
async fn test_cancelled_run_applies_and_records_nothing() {
    let runner = build_fails_with(&[NO_SPACE]);
    let memory = Arc::new(InMemoryRepairMemory::new());
    let orch = orchestrator(&runner, memory.clone());
    orch.cancellation_token().cancel();

    let report = orch.run().await.unwrap();

    assert_eq!(
        report.escalation.unwrap().reason,
        EscalationReason::Cancelled
    );
    assert!(!runner.was_called("docker system prune"));
    assert!(memory.entries().unwrap().is_empty());
}

/// A fix completing as cancellation arrives is neither verified nor recorded.
#[tokio::test]
async fn test_cancel_during_fix_skips_rebuild_and_memory() {
    let cancel = CancellationToken::new();
    let inner = build_fails_with(&[NO_SPACE]);
    let runner = CancelOnCommand {
        inner: inner.clone(),
        trigger: "docker system prune",
        cancel: cancel.clone(),
    };
    let memory = Arc::new(InMemoryRepairMemory::new());
    let orch = Orchestrator::new("/project", config(), Arc::new(runner), memory.clone())
        .unwrap()
        .with_cancellation(cancel);

    let report = orch.run().await.unwrap();

    let escalation = report.escalation.unwrap();
    assert_eq!(escalation.reason, EscalationReason::Cancelled);
    assert_eq!(escalation.phase, PipelinePhase::BuildRetry);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].outcome, AttemptOutcome::Cancelled);
    assert!(report.attempts[0].fixes_applied[0].ok);
    assert_eq!(inner.count_calls("docker system prune"), 1);
    // Only the baseline build ran.
    assert_eq!(inner.count_calls("npm run build"), 1);
    assert!(memory.entries().unwrap().is_empty());
}

/// Single-shot remediation parks its fix until the next call judges it.
#[tokio::test]
async fn test_remediate_once_settles_previous_fix() {
    let runner = MockRunner::new();
    let memory = Arc::new(InMemoryRepairMemory::new());
    let orch = orchestrator(&runner, memory.clone());
    let signature = ErrorSignature::for_pattern(ErrorCategory::Container, "docker_no_space");

    let outcome = orch.remediate_once(NO_SPACE).await;
    assert_eq!(outcome.applied().unwrap().fix_name, "docker_prune");
    assert!(outcome.reason.is_none());
    assert_eq!(runner.commands(), vec!["docker system prune -f"]);
    assert!(memory.entries().unwrap().is_empty());

    // Same signature again: the prune did not help.
    let outcome = orch.remediate_once(NO_SPACE).await;
    assert!(outcome.applied().is_some());
    let entry = memory.lookup(&signature).unwrap().unwrap();
    assert_eq!(entry.fix_name, "docker_prune");
    assert_eq!((entry.success_count, entry.failure_count), (0, 1));

    // Something else entirely: the second prune cleared it.
    let outcome = orch.remediate_once("all good, nothing to see").await;
    assert!(outcome.applied().is_none());
    assert_eq!(outcome.reason, Some(EscalationReason::Unclassifiable));
    let entry = memory.lookup(&signature).unwrap().unwrap();
    assert_eq!((entry.success_count, entry.failure_count), (1, 1));
}

/// Separate invocations share the parked fix through the state directory,
/// and a green baseline build settles it in favour of the fix.
#[tokio::test]
async fn test_parked_fix_survives_between_invocations() {
    let project = TempDir::new().unwrap();
    let memory = Arc::new(FileRepairMemory::for_project(project.path()).unwrap());

    let first = Orchestrator::new(
        project.path(),
        config(),
        Arc::new(MockRunner::new()),
        memory.clone(),
    )
    .unwrap()
    .with_pending_store(PendingStore::for_project(project.path()));
    assert!(first.remediate_once(ERESOLVE).await.applied().is_some());
    assert!(project.path().join(".mend").join(PENDING_FILE).exists());

    let runner = MockRunner::new();
    let second = Orchestrator::new(project.path(), config(), Arc::new(runner.clone()), memory)
        .unwrap()
        .with_pending_store(PendingStore::for_project(project.path()));
    let report = second.run().await.unwrap();

    assert!(report.succeeded());
    assert!(report.attempts.is_empty());
    assert!(!project.path().join(".mend").join(PENDING_FILE).exists());

    let reopened = FileRepairMemory::for_project(project.path()).unwrap();
    let entry = reopened
        .lookup(&ErrorSignature::heuristic(ErrorCategory::Lockfile))
        .unwrap()
        .unwrap();
    assert_eq!(entry.fix_name, "install_legacy_peer_deps");
    assert_eq!(entry.success_count, 1);
}

/// A single-shot fix whose command fails is recorded against it at once.
#[tokio::test]
async fn test_remediate_once_records_failed_fix_command() {
    let runner = MockRunner::new().on("docker system prune", vec![MockResponse::failure(1, "permission denied")]);
    let memory = Arc::new(InMemoryRepairMemory::new());
    let orch = orchestrator(&runner, memory.clone());

    let outcome = orch.remediate_once(NO_SPACE).await;

    assert_eq!(outcome.attempted[0].fix_name, "docker_prune");
    assert!(!outcome.attempted[0].ok);
    let entry = memory
        .lookup(&ErrorSignature::for_pattern(ErrorCategory::Container, "docker_no_space"))
        .unwrap()
        .unwrap();
    assert_eq!(entry.fix_name, "docker_prune");
    assert_eq!(entry.failure_count, 1);
}

/// File-backed memory and the event log land under the project's state directory.
#[tokio::test]
async fn test_memory_and_events_persist_under_project() {
    let project = TempDir::new().unwrap();
    let runner = build_fails_with(&[ERESOLVE]);
    let memory = Arc::new(FileRepairMemory::for_project(project.path()).unwrap());
    let orch = Orchestrator::new(project.path(), config(), Arc::new(runner.clone()), memory)
        .unwrap()
        .with_event_log(EventLog::for_project(project.path()));

    let report = orch.run().await.unwrap();
    assert!(report.succeeded());

    let reopened = FileRepairMemory::for_project(project.path()).unwrap();
    assert_eq!(reopened.entries().unwrap().len(), 1);

    let events = EventLog::load(&project.path().join(".mend").join("events.jsonl")).unwrap();
    assert!(events.iter().any(|e| e.message.starts_with("Diagnosed heuristic:lockfile")));
    assert!(events.iter().any(|e| e.message.starts_with("Applied install_legacy_peer_deps")));
    assert!(events.iter().all(|e| e.run_id == report.run_id));
}
