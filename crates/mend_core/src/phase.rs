//! Pipeline phases and the transition table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    /// Static checks before any build
    PreFlight,
    /// Build, diagnose, fix, rebuild
    BuildRetry,
    /// Start the service set
    Launch,
    /// Readiness probes after launch
    HealthVerify,
    Success,
    Escalated,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreFlight => "preflight",
            Self::BuildRetry => "build_retry",
            Self::Launch => "launch",
            Self::HealthVerify => "health_verify",
            Self::Success => "success",
            Self::Escalated => "escalated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Escalated)
    }

    /// Allowed successors. Phases only move forward, so BuildRetry can never
    /// be re-entered once the pipeline has launched.
    pub fn successors(&self) -> &'static [PipelinePhase] {
        use PipelinePhase::*;
        match self {
            PreFlight => &[BuildRetry, Escalated],
            BuildRetry => &[Launch, Escalated],
            Launch => &[HealthVerify, Escalated],
            HealthVerify => &[Success, Escalated],
            Success | Escalated => &[],
        }
    }

    pub fn can_transition_to(&self, next: PipelinePhase) -> bool {
        self.successors().contains(&next)
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A phase entered at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub phase: PipelinePhase,
    pub entered_at: DateTime<Utc>,
}

/// Current phase plus history, enforcing the transition table.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: PipelinePhase,
    history: Vec<PhaseTransition>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            current: PipelinePhase::PreFlight,
            history: vec![PhaseTransition {
                phase: PipelinePhase::PreFlight,
                entered_at: Utc::now(),
            }],
        }
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> PipelinePhase {
        self.current
    }

    pub fn history(&self) -> &[PhaseTransition] {
        &self.history
    }

    pub fn advance(&mut self, next: PipelinePhase) -> CoreResult<()> {
        if !self.current.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.current,
                to: next,
            });
        }
        debug!("Phase {} -> {}", self.current, next);
        self.current = next;
        self.history.push(PhaseTransition {
            phase: next,
            entered_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut tracker = PhaseTracker::new();
        for next in [
            PipelinePhase::BuildRetry,
            PipelinePhase::Launch,
            PipelinePhase::HealthVerify,
            PipelinePhase::Success,
        ] {
            tracker.advance(next).unwrap();
        }
        assert_eq!(tracker.current(), PipelinePhase::Success);
        assert_eq!(tracker.history().len(), 5);
    }

    #[test]
    fn test_build_retry_cannot_reenter_after_health_verify() {
        let mut tracker = PhaseTracker::new();
        tracker.advance(PipelinePhase::BuildRetry).unwrap();
        tracker.advance(PipelinePhase::Launch).unwrap();
        tracker.advance(PipelinePhase::HealthVerify).unwrap();

        let err = tracker.advance(PipelinePhase::BuildRetry).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(tracker.current(), PipelinePhase::HealthVerify);
    }

    #[test]
    fn test_preflight_may_escalate_directly() {
        let mut tracker = PhaseTracker::new();
        tracker.advance(PipelinePhase::Escalated).unwrap();
        assert!(tracker.current().is_terminal());
        assert!(tracker.advance(PipelinePhase::BuildRetry).is_err());
    }

    #[test]
    fn test_preflight_cannot_skip_to_launch() {
        assert!(!PipelinePhase::PreFlight.can_transition_to(PipelinePhase::Launch));
        assert!(!PipelinePhase::Success.can_transition_to(PipelinePhase::Escalated));
    }
}
