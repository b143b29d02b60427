//! Service launch.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use mend_runner::{CommandRunner, CommandSpec, RunConfig};

use crate::error::CoreResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchOutcome {
    pub ok: bool,
    pub output: String,
}

/// Starts the service set.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceLauncher: Send + Sync {
    async fn launch(&self) -> CoreResult<LaunchOutcome>;
}

/// Launch by running a command, typically `docker compose up -d`.
pub struct CommandLauncher {
    runner: Arc<dyn CommandRunner>,
    command: CommandSpec,
    timeout_seconds: u64,
}

impl CommandLauncher {
    pub fn new(runner: Arc<dyn CommandRunner>, command: CommandSpec, timeout_seconds: u64) -> Self {
        Self {
            runner,
            command,
            timeout_seconds,
        }
    }
}

#[async_trait]
impl ServiceLauncher for CommandLauncher {
    async fn launch(&self) -> CoreResult<LaunchOutcome> {
        info!("Launching services: {}", self.command);
        let result = self
            .runner
            .run(&self.command, &RunConfig::default().timeout(self.timeout_seconds))
            .await?;
        Ok(LaunchOutcome {
            ok: result.success(),
            output: result.combined_output(),
        })
    }
}
