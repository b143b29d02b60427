//! Command and run configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};

/// A subprocess invocation.
///
/// Programs are spawned directly rather than through a shell, so arguments
/// are passed verbatim and never re-interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to execute
    pub program: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Working directory (defaults to the current directory)
    pub workdir: Option<PathBuf>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
            env: BTreeMap::new(),
        }
    }

    /// Parse a command line such as `npm run build` with POSIX shell word
    /// splitting: quotes group words and backslash escapes the next
    /// character. Nothing is expanded.
    pub fn parse(line: &str) -> RunnerResult<Self> {
        let words = shlex::split(line).ok_or_else(|| {
            RunnerError::InvalidCommand(format!("unterminated quote or escape in: {}", line))
        })?;
        let mut iter = words.into_iter();
        let program = iter
            .next()
            .ok_or_else(|| RunnerError::InvalidCommand("empty command line".to_string()))?;
        Ok(Self::new(program).args(iter))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Render the command for logging.
    pub fn display(&self) -> String {
        let mut cmd = self.program.clone();
        for arg in &self.args {
            if arg.contains(' ') || arg.is_empty() {
                cmd.push_str(&format!(" '{}'", arg));
            } else {
                cmd.push_str(&format!(" {}", arg));
            }
        }
        cmd
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Run configuration with timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Timeout in seconds (0 = no timeout)
    pub timeout_seconds: u64,
    /// Whether to stream output lines while the command runs
    pub stream_logs: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 120,
            stream_logs: false,
        }
    }
}

impl RunConfig {
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn stream(mut self) -> Self {
        self.stream_logs = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("npm")
            .arg("install")
            .arg("--legacy-peer-deps")
            .workdir("/app")
            .env("CI", "true");

        assert_eq!(spec.display(), "npm install --legacy-peer-deps");
        assert_eq!(spec.workdir, Some(PathBuf::from("/app")));
        assert_eq!(spec.env.get("CI"), Some(&"true".to_string()));
    }

    #[test]
    fn test_parse_command_line() {
        let spec = CommandSpec::parse("docker compose  build --build-arg 'NODE_ENV=production build'").unwrap();
        assert_eq!(spec.program, "docker");
        assert_eq!(
            spec.args,
            vec!["compose", "build", "--build-arg", "NODE_ENV=production build"]
        );
    }

    #[test]
    fn test_parse_honors_backslash_escapes() {
        let spec = CommandSpec::parse(r#"mvn package --define=a\ b "-Dx=\"y\"""#).unwrap();
        assert_eq!(spec.program, "mvn");
        assert_eq!(spec.args, vec!["package", "--define=a b", "-Dx=\"y\""]);

        let spec = CommandSpec::parse(r"make CFLAGS=-O2\ -g").unwrap();
        assert_eq!(spec.args, vec!["CFLAGS=-O2 -g"]);
    }

    #[test]
    fn test_parse_rejects_empty_and_unterminated() {
        assert!(CommandSpec::parse("   ").is_err());
        assert!(CommandSpec::parse("npm run \"build").is_err());
        assert!(CommandSpec::parse("npm run build\\").is_err());
    }

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.timeout_seconds, 120);
        assert!(!config.stream_logs);

        let config = RunConfig::default().timeout(5).stream();
        assert_eq!(config.timeout_seconds, 5);
        assert!(config.stream_logs);
    }
}
