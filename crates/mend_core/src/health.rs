//! Post-launch health verification.
//!
//! Failures here degrade the run; nothing is rolled back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mend_runner::ServiceStatusSource;

/// Result of one readiness signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub healthy: bool,
    pub message: String,
}

impl HealthCheckResult {
    pub fn healthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: true,
            message: message.into(),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub checks: Vec<HealthCheckResult>,
}

impl HealthReport {
    pub fn degraded(&self) -> bool {
        self.checks.iter().any(|c| !c.healthy)
    }

    pub fn failures(&self) -> impl Iterator<Item = &HealthCheckResult> {
        self.checks.iter().filter(|c| !c.healthy)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> String;

    async fn check(&self) -> HealthCheckResult;
}

/// Poll an HTTP endpoint until it answers 2xx or the timeout passes.
pub struct HttpHealthCheck {
    url: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl HttpHealthCheck {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(timeout_secs),
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    fn name(&self) -> String {
        format!("http {}", self.url)
    }

    async fn check(&self) -> HealthCheckResult {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
        {
            Ok(client) => client,
            Err(e) => return HealthCheckResult::unhealthy(self.name(), format!("client error: {}", e)),
        };

        let start = Instant::now();
        let mut last = String::from("no response");
        loop {
            match client.get(&self.url).send().await {
                Ok(response) if response.status().is_success() => {
                    return HealthCheckResult::healthy(
                        self.name(),
                        format!("{} after {}ms", response.status(), start.elapsed().as_millis()),
                    );
                }
                Ok(response) => last = format!("status {}", response.status()),
                Err(e) => last = e.to_string(),
            }
            if start.elapsed() >= self.timeout {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        warn!("Health endpoint {} not ready: {}", self.url, last);
        HealthCheckResult::unhealthy(
            self.name(),
            format!("not ready after {}s: {}", self.timeout.as_secs(), last),
        )
    }
}

/// At least `expected` services are running.
pub struct ServiceCountCheck {
    source: Arc<dyn ServiceStatusSource>,
    expected: usize,
}

impl ServiceCountCheck {
    pub fn new(source: Arc<dyn ServiceStatusSource>, expected: usize) -> Self {
        Self { source, expected }
    }
}

#[async_trait]
impl HealthCheck for ServiceCountCheck {
    fn name(&self) -> String {
        "service-count".to_string()
    }

    async fn check(&self) -> HealthCheckResult {
        match self.source.services().await {
            Ok(services) => {
                let running = services.iter().filter(|s| s.running).count();
                debug!("{} of {} services running", running, services.len());
                if running >= self.expected {
                    HealthCheckResult::healthy(
                        self.name(),
                        format!("{}/{} services running", running, self.expected),
                    )
                } else {
                    HealthCheckResult::unhealthy(
                        self.name(),
                        format!("only {}/{} services running", running, self.expected),
                    )
                }
            }
            Err(e) => HealthCheckResult::unhealthy(self.name(), format!("cannot list services: {}", e)),
        }
    }
}

/// No service is restarting or has restarted `threshold` times.
pub struct RestartLoopCheck {
    source: Arc<dyn ServiceStatusSource>,
    threshold: i64,
}

impl RestartLoopCheck {
    pub const DEFAULT_THRESHOLD: i64 = 3;

    pub fn new(source: Arc<dyn ServiceStatusSource>) -> Self {
        Self {
            source,
            threshold: Self::DEFAULT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: i64) -> Self {
        self.threshold = threshold;
        self
    }
}

#[async_trait]
impl HealthCheck for RestartLoopCheck {
    fn name(&self) -> String {
        "restart-loop".to_string()
    }

    async fn check(&self) -> HealthCheckResult {
        let services = match self.source.services().await {
            Ok(services) => services,
            Err(e) => {
                return HealthCheckResult::unhealthy(self.name(), format!("cannot list services: {}", e))
            }
        };

        let looping: Vec<String> = services
            .iter()
            .filter(|s| s.restarting || s.restart_count >= self.threshold)
            .map(|s| format!("{} ({} restarts)", s.name, s.restart_count))
            .collect();

        if looping.is_empty() {
            HealthCheckResult::healthy(self.name(), "no restart loops")
        } else {
            HealthCheckResult::unhealthy(self.name(), format!("restart loop: {}", looping.join(", ")))
        }
    }
}

/// Run checks in order.
pub async fn verify(checks: &[Arc<dyn HealthCheck>]) -> HealthReport {
    let mut report = HealthReport::default();
    for check in checks {
        let result = check.check().await;
        debug!("Health check {}: healthy={}", result.name, result.healthy);
        report.checks.push(result);
    }
    report
}
