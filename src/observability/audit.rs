/// Execution audit events
///
/// Every execution emits a start and an end event; timeouts, launch failures,
/// group kills, truncation and cleanup failures add their own. Events go to the
/// `log` facade as one JSON object per line and, when an audit file has been
/// configured, are appended there as well.
use crate::config::types::{Result, RunnerError};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionEventType {
    ExecutionStart,
    ExecutionEnd,
    LaunchFailure,
    WallTimeLimit,
    Cancelled,
    GroupKill,
    OutputLimit,
    CleanupFailure,
}

impl ExecutionEventType {
    pub fn default_severity(&self) -> Severity {
        match self {
            ExecutionEventType::ExecutionStart | ExecutionEventType::ExecutionEnd => Severity::Low,
            ExecutionEventType::WallTimeLimit
            | ExecutionEventType::Cancelled
            | ExecutionEventType::GroupKill
            | ExecutionEventType::OutputLimit => Severity::Medium,
            ExecutionEventType::LaunchFailure | ExecutionEventType::CleanupFailure => {
                Severity::High
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub event_type: ExecutionEventType,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl ExecutionEvent {
    pub fn new(event_type: ExecutionEventType, details: impl Into<String>) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: Utc::now(),
            details: details.into(),
            run_id: None,
            pid: None,
            file_path: None,
        }
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_file_path(mut self, path: &Path) -> Self {
        self.file_path = Some(path.display().to_string());
        self
    }

    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"event_type\":\"{:?}\",\"details\":{:?}}}",
                self.event_type, self.details
            )
        })
    }
}

/// Append-only audit file shared by all executions in the process
pub struct AuditLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl AuditLog {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RunnerError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                RunnerError::Config(format!(
                    "Failed to open audit log {}: {}",
                    path.display(),
                    e
                ))
            })?;

        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) {
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line) {
                    error!("Failed to write audit log: {}", e);
                }
            }
            Err(_) => error!("Audit log lock poisoned"),
        }
    }
}

static AUDIT_LOG: OnceLock<AuditLog> = OnceLock::new();

/// Route audit events to `path` in addition to the logger.
/// Only the first call takes effect.
pub fn init_audit_log(path: PathBuf) -> Result<()> {
    let log = AuditLog::open(path)?;
    let path = log.path().to_path_buf();
    if AUDIT_LOG.set(log).is_err() {
        warn!("Audit log already initialized, ignoring {}", path.display());
    } else {
        info!("Audit log initialized at {}", path.display());
    }
    Ok(())
}

pub fn log_event(event: ExecutionEvent) {
    let line = event.to_json_line();
    match event.severity {
        Severity::High => error!(target: "nimble_runner::audit", "{}", line),
        Severity::Medium => warn!(target: "nimble_runner::audit", "{}", line),
        Severity::Low => info!(target: "nimble_runner::audit", "{}", line),
    }

    if let Some(audit) = AUDIT_LOG.get() {
        audit.append(&line);
    }
}

/// Convenience functions for the lifecycle events
pub mod events {
    use super::*;
    use std::time::Duration;

    pub fn execution_start(run_id: &str, program: &Path) {
        log_event(
            ExecutionEvent::new(ExecutionEventType::ExecutionStart, "execution started")
                .with_run_id(run_id)
                .with_file_path(program),
        );
    }

    pub fn execution_end(run_id: &str, outcome: &str, elapsed: Duration) {
        log_event(
            ExecutionEvent::new(
                ExecutionEventType::ExecutionEnd,
                format!("execution finished: {} in {}ms", outcome, elapsed.as_millis()),
            )
            .with_run_id(run_id),
        );
    }

    pub fn launch_failure(binary: &Path, cause: &str) {
        log_event(
            ExecutionEvent::new(
                ExecutionEventType::LaunchFailure,
                format!("failed to launch interpreter: {}", cause),
            )
            .with_file_path(binary),
        );
    }

    pub fn wall_time_limit(pid: u32, deadline: Duration) {
        log_event(
            ExecutionEvent::new(
                ExecutionEventType::WallTimeLimit,
                format!("deadline of {}ms exceeded", deadline.as_millis()),
            )
            .with_pid(pid),
        );
    }

    pub fn cancelled(pid: u32) {
        log_event(
            ExecutionEvent::new(ExecutionEventType::Cancelled, "execution cancelled by caller")
                .with_pid(pid),
        );
    }

    pub fn group_kill(pid: u32, details: String) {
        log_event(ExecutionEvent::new(ExecutionEventType::GroupKill, details).with_pid(pid));
    }

    pub fn output_limit(pid: u32, stream: &str, limit: usize) {
        log_event(
            ExecutionEvent::new(
                ExecutionEventType::OutputLimit,
                format!("{} truncated at {} bytes", stream, limit),
            )
            .with_pid(pid),
        );
    }

    pub fn cleanup_failure(path: &Path, cause: &str) {
        log_event(
            ExecutionEvent::new(
                ExecutionEventType::CleanupFailure,
                format!("failed to remove staged program: {}", cause),
            )
            .with_file_path(path),
        );
    }
}
