//! Docker service status via the Docker Engine API.
//!
//! Health verification needs two facts about the launched service set: how
//! many services are running and whether any of them is stuck in a restart
//! loop. Both come from container listings and inspections.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::Docker;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RunnerError, RunnerResult};

/// Compose label identifying the project a container belongs to.
const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
/// Compose label identifying the service a container runs.
const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

/// Observed state of one service container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub state: String,
    pub running: bool,
    pub restarting: bool,
    pub restart_count: i64,
}

impl ServiceStatus {
    pub fn running(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: "running".to_string(),
            running: true,
            restarting: false,
            restart_count: 0,
        }
    }

    pub fn with_restarts(mut self, count: i64) -> Self {
        self.restart_count = count;
        self
    }

    pub fn restarting(mut self) -> Self {
        self.state = "restarting".to_string();
        self.running = false;
        self.restarting = true;
        self
    }
}

/// Which containers make up the launched service set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerScope {
    /// Containers carrying this compose project label.
    Project(String),
    /// Every container on the daemon, including ones unrelated to the project.
    All,
}

impl ContainerScope {
    fn filters(&self) -> HashMap<String, Vec<String>> {
        let mut filters = HashMap::new();
        if let Self::Project(project) = self {
            filters.insert(
                "label".to_string(),
                vec![format!("{}={}", COMPOSE_PROJECT_LABEL, project)],
            );
        }
        filters
    }
}

/// Derive the project name `docker compose` uses for a directory:
/// lowercased, only `[a-z0-9_-]` kept, starting with a letter or digit.
pub fn compose_project_name(dir_name: &str) -> Option<String> {
    let name: String = dir_name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect();
    let name = name.trim_start_matches(['_', '-']);
    (!name.is_empty()).then(|| name.to_string())
}

/// Source of service status information.
#[async_trait]
pub trait ServiceStatusSource: Send + Sync {
    async fn services(&self) -> RunnerResult<Vec<ServiceStatus>>;
}

/// Service status read from the local Docker daemon.
pub struct DockerServiceStatus {
    client: Docker,
    scope: ContainerScope,
}

impl DockerServiceStatus {
    /// Connect to the local Docker daemon.
    pub async fn new(scope: ContainerScope) -> RunnerResult<Self> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| RunnerError::DockerNotAvailable(e.to_string()))?;
        client
            .ping()
            .await
            .map_err(|e| RunnerError::DockerNotAvailable(e.to_string()))?;
        Ok(Self { client, scope })
    }

    fn service_name(labels: &HashMap<String, String>, names: &[String]) -> String {
        labels
            .get(COMPOSE_SERVICE_LABEL)
            .cloned()
            .or_else(|| names.first().map(|n| n.trim_start_matches('/').to_string()))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[async_trait]
impl ServiceStatusSource for DockerServiceStatus {
    async fn services(&self) -> RunnerResult<Vec<ServiceStatus>> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: self.scope.filters(),
            ..Default::default()
        };
        let containers = self.client.list_containers(Some(options)).await?;

        let mut statuses = Vec::with_capacity(containers.len());
        for container in containers {
            let Some(id) = container.id else { continue };
            let labels = container.labels.unwrap_or_default();
            let names = container.names.unwrap_or_default();
            let state = container.state.unwrap_or_default();

            let inspect = self
                .client
                .inspect_container(&id, None::<InspectContainerOptions>)
                .await?;
            let restart_count = inspect.restart_count.unwrap_or(0);
            let restarting = inspect
                .state
                .as_ref()
                .and_then(|s| s.restarting)
                .unwrap_or(false);

            let status = ServiceStatus {
                name: Self::service_name(&labels, &names),
                running: state == "running",
                state,
                restarting,
                restart_count,
            };
            debug!("Service {} is {} ({} restarts)", status.name, status.state, status.restart_count);
            statuses.push(status);
        }

        Ok(statuses)
    }
}
