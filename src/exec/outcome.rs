use crate::config::types::OutputIntegrity;
use serde::{Deserialize, Serialize};
use std::process::ExitStatus;

/// Diagnostic reported when a program overruns the deadline
pub const TIMEOUT_MESSAGE: &str = "[ERROR] Execution timed out";
/// Diagnostic reported when the caller cancels an in-flight execution
pub const CANCELLED_MESSAGE: &str = "[ERROR] Execution cancelled";
/// Appended to the error text when a completed program's output could not be
/// drained, typically because a detached process still holds the pipe
pub const INCOMPLETE_OUTPUT_MESSAGE: &str =
    "[ERROR] Output incomplete: a background process kept the output stream open";

/// Source text submitted by a caller.
///
/// Deserializes from the `{"code": "..."}` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(rename = "code", default)]
    source: String,
}

impl ExecutionRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// What happened to one supervised subprocess
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Exited within the deadline, whatever its exit status
    Completed {
        stdout: String,
        stderr: String,
        exit_status: ExitStatus,
        integrity: OutputIntegrity,
    },
    /// Killed at the deadline; partial output is discarded
    TimedOut,
    /// Interpreter could not be started
    LaunchFailed { cause: String },
    /// Torn down early through a cancellation token
    Cancelled,
}

impl ExecutionOutcome {
    /// Short label for logs and audit events
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Completed { .. } => "completed",
            ExecutionOutcome::TimedOut => "timed_out",
            ExecutionOutcome::LaunchFailed { .. } => "launch_failed",
            ExecutionOutcome::Cancelled => "cancelled",
        }
    }
}

/// Caller-facing result: `{"output": ..., "error": ...}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub error: String,
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: error.into(),
        }
    }

    /// No error text means the program ran cleanly
    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }

    pub fn staging_failed(cause: impl std::fmt::Display) -> Self {
        Self::failure(format!("[ERROR] Failed to stage program: {}", cause))
    }
}

impl From<ExecutionOutcome> for ExecutionResult {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Completed {
                stdout,
                mut stderr,
                integrity,
                ..
            } => {
                if integrity == OutputIntegrity::CollectorTimeout {
                    if !stderr.is_empty() && !stderr.ends_with('\n') {
                        stderr.push('\n');
                    }
                    stderr.push_str(INCOMPLETE_OUTPUT_MESSAGE);
                }
                ExecutionResult {
                    output: stdout,
                    error: stderr,
                }
            }
            ExecutionOutcome::TimedOut => ExecutionResult::failure(TIMEOUT_MESSAGE),
            ExecutionOutcome::LaunchFailed { cause } => ExecutionResult::failure(format!(
                "[ERROR] Failed to launch interpreter: {}",
                cause
            )),
            ExecutionOutcome::Cancelled => ExecutionResult::failure(CANCELLED_MESSAGE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn completed_passes_streams_through() {
        let outcome = ExecutionOutcome::Completed {
            stdout: "2\n".to_string(),
            stderr: "warning\n".to_string(),
            exit_status: ExitStatus::from_raw(1 << 8),
            integrity: OutputIntegrity::Complete,
        };
        let result = ExecutionResult::from(outcome);
        assert_eq!(result.output, "2\n");
        assert_eq!(result.error, "warning\n");
    }

    #[test]
    fn undrained_output_is_kept_and_flagged() {
        let outcome = ExecutionOutcome::Completed {
            stdout: "hello".to_string(),
            stderr: "warn".to_string(),
            exit_status: ExitStatus::from_raw(0),
            integrity: OutputIntegrity::CollectorTimeout,
        };
        let result = ExecutionResult::from(outcome);
        assert_eq!(result.output, "hello");
        assert_eq!(result.error, format!("warn\n{}", INCOMPLETE_OUTPUT_MESSAGE));
        assert!(!result.is_success());
    }

    #[test]
    fn truncated_output_projects_without_diagnostic() {
        let outcome = ExecutionOutcome::Completed {
            stdout: "xxxx".to_string(),
            stderr: String::new(),
            exit_status: ExitStatus::from_raw(0),
            integrity: OutputIntegrity::TruncatedByLimit,
        };
        assert_eq!(ExecutionResult::from(outcome).error, "");
    }

    #[test]
    fn timeout_uses_fixed_diagnostic() {
        let result = ExecutionResult::from(ExecutionOutcome::TimedOut);
        assert_eq!(
            result,
            ExecutionResult {
                output: String::new(),
                error: "[ERROR] Execution timed out".to_string(),
            }
        );
    }

    #[test]
    fn launch_failure_carries_cause() {
        let result = ExecutionResult::from(ExecutionOutcome::LaunchFailed {
            cause: "No such file or directory".to_string(),
        });
        assert!(result.output.is_empty());
        assert!(result.error.contains("No such file or directory"));
        assert!(!result.is_success());
    }

    #[test]
    fn result_serializes_to_two_fields() {
        let json = serde_json::to_value(ExecutionResult {
            output: "hello".to_string(),
            error: String::new(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"output": "hello", "error": ""}));
    }

    #[test]
    fn request_reads_code_field() {
        let request: ExecutionRequest = serde_json::from_str(r#"{"code": "print(1);"}"#).unwrap();
        assert_eq!(request.source(), "print(1);");

        let empty: ExecutionRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.source(), "");
    }
}
