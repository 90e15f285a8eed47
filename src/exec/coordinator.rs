//! Execution coordinator: stage, supervise, release, project.

use crate::config::types::{Result, RunnerConfig};
use crate::config::validator::validate_config;
use crate::exec::cancel::CancelToken;
use crate::exec::outcome::{ExecutionOutcome, ExecutionRequest, ExecutionResult};
use crate::exec::supervisor::Supervisor;
use crate::observability::audit::events;
use crate::safety::staging::StagingArea;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Single entry point turning source text into an [`ExecutionResult`].
///
/// Holds no per-request state, so one coordinator can serve any number of
/// concurrent callers by shared reference.
#[derive(Debug, Clone)]
pub struct ExecutionCoordinator {
    interpreter: PathBuf,
    deadline: Duration,
    staging: StagingArea,
    supervisor: Supervisor,
}

impl ExecutionCoordinator {
    /// Validate `config` and prepare the staging directory
    pub fn new(config: RunnerConfig) -> Result<Self> {
        let validation = validate_config(&config)?;
        for warning in validation.warnings {
            log::warn!("Configuration warning: {}", warning);
        }

        let staging = StagingArea::new(config.staging_dir.clone(), config.extension.clone())?;

        Ok(Self {
            interpreter: config.interpreter.clone(),
            deadline: config.timeout(),
            supervisor: Supervisor::from_config(&config),
            staging,
        })
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn execute(&self, source: &str) -> ExecutionResult {
        self.execute_inner(source, None)
    }

    pub fn execute_with_cancel(&self, source: &str, cancel: &CancelToken) -> ExecutionResult {
        self.execute_inner(source, Some(cancel))
    }

    pub fn execute_request(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.execute(request.source())
    }

    fn execute_inner(&self, source: &str, cancel: Option<&CancelToken>) -> ExecutionResult {
        let mut staged = match self.staging.stage(source) {
            Ok(staged) => staged,
            Err(e) => {
                log::error!("{}", e);
                return ExecutionResult::staging_failed(e);
            }
        };

        let started = Instant::now();
        events::execution_start(staged.run_id(), staged.path());

        let args = [staged.path()];
        let outcome = match cancel {
            Some(token) => {
                self.supervisor
                    .run_with_cancel(&self.interpreter, args, self.deadline, token)
            }
            None => self.supervisor.run(&self.interpreter, args, self.deadline),
        };

        // Released before projecting; the guard's Drop covers unwinding.
        staged.release();
        events::execution_end(staged.run_id(), outcome.label(), started.elapsed());

        if let ExecutionOutcome::Completed { exit_status, .. } = &outcome {
            if !exit_status.success() {
                log::debug!("program {} exited with {}", staged.run_id(), exit_status);
            }
        }

        ExecutionResult::from(outcome)
    }
}
