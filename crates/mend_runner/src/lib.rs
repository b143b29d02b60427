//! # mend_runner
//!
//! Subprocess execution boundary for Mend.
//!
//! Everything Mend does to the outside world goes through this crate: the
//! external build tool, remediation commands, the service launch command and
//! the Docker status queries used by health verification.
//!
//! # Features
//!
//! - **Process Runner**: tokio subprocesses with combined output capture and hard timeouts
//! - **Fix Executor**: bounded, never-raising execution of remediation commands
//! - **Dry-Run Mode**: Log commands without executing them
//! - **CI Integration**: Timestamped, stream-tagged log lines
//! - **Service Status**: Running and restart-loop state from the Docker API
//! - **Mock Runner**: Scripted responses for testing without real processes
//!
//! # Example
//!
//! ```rust,no_run
//! use mend_runner::{CommandRunner, CommandSpec, ProcessRunner, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = ProcessRunner::default();
//!     let build = CommandSpec::parse("npm run build")?.workdir("/srv/app");
//!
//!     let result = runner.run(&build, &RunConfig::default().timeout(900)).await?;
//!     println!("Exit code: {}", result.exit_code);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod docker;
pub mod error;
pub mod executor;
pub mod mock;
pub mod process;
pub mod runner;

pub use config::{CommandSpec, RunConfig};
pub use docker::{
    compose_project_name, ContainerScope, DockerServiceStatus, ServiceStatus, ServiceStatusSource,
};
pub use error::{RunnerError, RunnerResult};
pub use executor::{FixExecutor, FixOutcome};
pub use mock::{CapturedCall, MockResponse, MockRunner};
pub use process::{LogHandler, LogLine, LogStream, ProcessRunner, ProcessRunnerOptions};
pub use runner::{CommandRunner, ExecutionResult};
