/// Configuration loading from nimble-runner.json
use crate::config::types::{Result, RunnerConfig, RunnerError};
use std::path::{Path, PathBuf};

/// File looked up in the current directory by [`RunnerConfig::load_default`]
pub const DEFAULT_CONFIG_FILE: &str = "nimble-runner.json";

impl RunnerConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RunnerError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            RunnerError::Config(format!(
                "Failed to parse config JSON {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Load ./nimble-runner.json, or fall back to built-in defaults when absent
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::current_dir()
            .map_err(|e| RunnerError::Config(format!("Failed to get current directory: {}", e)))?
            .join(DEFAULT_CONFIG_FILE);

        if !config_path.exists() {
            log::warn!(
                "{} not found in current directory, using built-in defaults",
                DEFAULT_CONFIG_FILE
            );
            return Ok(Self::default());
        }

        Self::load_from_file(config_path)
    }

    /// Explicit file when given, otherwise [`RunnerConfig::load_default`]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load_default(),
        }
    }

    /// Apply command-line overrides on top of file values
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(interpreter) = &overrides.interpreter {
            self.interpreter = interpreter.clone();
        }
        if let Some(staging_dir) = &overrides.staging_dir {
            self.staging_dir = staging_dir.clone();
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
        self
    }
}

/// Values a caller may override after the file is loaded
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub interpreter: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
}
