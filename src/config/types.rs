/// Core types shared across the runner
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Runner configuration.
///
/// Every field has a default so a partial JSON file only needs to name the
/// values it overrides.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Interpreter binary invoked as `<interpreter> <staged file>`
    pub interpreter: PathBuf,
    /// Directory holding staged programs while they run
    pub staging_dir: PathBuf,
    /// Extension given to staged programs (without the dot)
    pub extension: String,
    /// Wall-clock deadline for one execution
    pub timeout_ms: u64,
    /// Delay between SIGTERM and SIGKILL when tearing down a process group
    pub kill_grace_ms: u64,
    /// How long to wait for the output readers after the interpreter exits
    pub drain_timeout_ms: u64,
    /// Per-stream stdout cap (bytes)
    pub stdout_limit: usize,
    /// Per-stream stderr cap (bytes)
    pub stderr_limit: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("./bin/nimble"),
            staging_dir: Self::default_staging_dir(),
            extension: "nbl".to_string(),
            timeout_ms: 5_000,
            kill_grace_ms: 200,
            drain_timeout_ms: 1_000,
            stdout_limit: 1024 * 1024,
            stderr_limit: 256 * 1024,
        }
    }
}

impl RunnerConfig {
    pub fn default_staging_dir() -> PathBuf {
        std::env::temp_dir().join("nimble-runner")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Output integrity classification for one captured stream
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OutputIntegrity {
    #[default]
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "truncated_by_limit")]
    TruncatedByLimit,
    #[serde(rename = "read_error")]
    ReadError,
    #[serde(rename = "collector_timeout")]
    CollectorTimeout,
}

impl OutputIntegrity {
    /// Worse of two states, used to fold stdout and stderr into one verdict.
    pub fn merge(self, other: OutputIntegrity) -> OutputIntegrity {
        fn rank(i: OutputIntegrity) -> u8 {
            match i {
                OutputIntegrity::Complete => 0,
                OutputIntegrity::TruncatedByLimit => 1,
                OutputIntegrity::CollectorTimeout => 2,
                OutputIntegrity::ReadError => 3,
            }
        }
        if rank(other) > rank(self) {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByLimit => write!(f, "truncated_by_limit"),
            OutputIntegrity::ReadError => write!(f, "read_error"),
            OutputIntegrity::CollectorTimeout => write!(f, "collector_timeout"),
        }
    }
}

/// Error types for the runner
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Launch error: {0}")]
    Launch(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
