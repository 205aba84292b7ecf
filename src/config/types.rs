//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::ConfigError;
use crate::worker::WorkerCommand;

/// Configuration for one supervised worker run.
///
/// Immutable for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Path to the pressy executable.
    #[serde(default = "default_executable_path")]
    pub executable_path: PathBuf,
    /// Extra arguments passed to the worker.
    #[serde(default)]
    pub worker_args: Vec<String>,
    /// Working directory override. Defaults to the input file's directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Interval between `state` queries, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Forward worker stderr to our stderr.
    #[serde(default = "default_true")]
    pub include_stderr: bool,
    /// Time the worker gets to exit after `quit`, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Subscribe to SIGINT/SIGTERM.
    #[serde(default = "default_true")]
    pub handle_signals: bool,
}

fn default_executable_path() -> PathBuf {
    PathBuf::from("pressy")
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            executable_path: default_executable_path(),
            worker_args: Vec::new(),
            working_dir: None,
            poll_interval_ms: default_poll_interval_ms(),
            include_stderr: true,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            handle_signals: true,
        }
    }
}

impl SupervisorConfig {
    /// Create a config for the given executable with all other fields defaulted.
    #[must_use]
    pub fn new(executable_path: impl Into<PathBuf>) -> Self {
        Self {
            executable_path: executable_path.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Build the launch command, running in `default_dir` unless overridden.
    #[must_use]
    pub fn worker_command(&self, default_dir: Option<PathBuf>) -> WorkerCommand {
        let command = WorkerCommand::new(&self.executable_path)
            .args(self.worker_args.iter().cloned())
            .include_stderr(self.include_stderr);

        match self.working_dir.clone().or(default_dir) {
            Some(dir) => command.working_dir(dir),
            None => command,
        }
    }
}

/// Connection settings for the pressy HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Path prefix prepended to every endpoint.
    #[serde(default)]
    pub prefix: String,
    /// Value of the `X-API-KEY` header.
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_api_key() -> String {
    "change-me".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            prefix: String::new(),
            api_key: default_api_key(),
        }
    }
}

impl ApiConfig {
    /// Base URL of the API, `http://{host}:{port}{prefix}`.
    #[must_use]
    pub fn api_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.prefix)
    }

    /// Full URL for an endpoint path.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidApiUrl` if the result is not a valid URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        let raw = format!("{}{path}", self.api_url());
        Url::parse(&raw).map_err(|source| ConfigError::InvalidApiUrl { url: raw, source })
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub api: ApiConfig,
}
