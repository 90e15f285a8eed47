// Config validation
// Startup validation fails fast with actionable errors; soft issues become warnings.

use crate::config::types::{Result, RunnerConfig, RunnerError};
use std::os::unix::fs::PermissionsExt;

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate config at startup. Any error is fatal.
pub fn validate_config(config: &RunnerConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_limits(config, &mut result);
    validate_staging(config, &mut result);

    if !result.is_valid() {
        return Err(RunnerError::Config(format!(
            "Config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn validate_limits(config: &RunnerConfig, result: &mut ValidationResult) {
    if config.timeout_ms == 0 {
        result.add_error("timeout_ms cannot be zero".to_string());
    } else if config.timeout_ms > 60_000 {
        result.add_warning(format!(
            "timeout_ms {} is very high (> 60s), runaway programs will hold resources",
            config.timeout_ms
        ));
    }

    if config.kill_grace_ms > config.timeout_ms {
        result.add_warning(format!(
            "kill_grace_ms {} exceeds timeout_ms {}",
            config.kill_grace_ms, config.timeout_ms
        ));
    }

    if config.stdout_limit == 0 {
        result.add_error("stdout_limit cannot be zero".to_string());
    }
    if config.stderr_limit == 0 {
        result.add_error("stderr_limit cannot be zero".to_string());
    }
}

fn validate_staging(config: &RunnerConfig, result: &mut ValidationResult) {
    if config.extension.is_empty() {
        result.add_error("extension cannot be empty".to_string());
    } else if config.extension.contains(['/', '.']) {
        result.add_error(format!(
            "extension '{}' must be a bare suffix without '/' or '.'",
            config.extension
        ));
    }

    if config.staging_dir.as_os_str().is_empty() {
        result.add_error("staging_dir cannot be empty".to_string());
    }
}

/// Check that the interpreter exists and is executable.
///
/// Not part of [`validate_config`]: a missing interpreter is reported per
/// execution as a launch failure, not as a startup error.
pub fn check_interpreter(config: &RunnerConfig) -> Result<()> {
    let metadata = std::fs::metadata(&config.interpreter).map_err(|e| {
        RunnerError::Launch(format!(
            "interpreter {} is not accessible: {}",
            config.interpreter.display(),
            e
        ))
    })?;

    if !metadata.is_file() {
        return Err(RunnerError::Launch(format!(
            "interpreter {} is not a regular file",
            config.interpreter.display()
        )));
    }

    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(RunnerError::Launch(format!(
            "interpreter {} is not executable",
            config.interpreter.display()
        )));
    }

    Ok(())
}
