//! Process supervisor.
//!
//! Launches one interpreter process in its own process group, drains its
//! output on reader threads, and polls for exit against a wall-clock deadline.
//! On deadline or cancellation the whole group is torn down (SIGTERM, grace,
//! SIGKILL) and the child is reaped before returning. On normal exit any
//! descendants still in the group are killed so nothing outlives the call.

use crate::config::types::{OutputIntegrity, RunnerConfig};
use crate::exec::cancel::CancelToken;
use crate::exec::outcome::ExecutionOutcome;
use crate::kernel::signal::{kill_stragglers, leader_exited, terminate_group};
use crate::observability::audit::events;
use crate::utils::output::{OutputCollector, OutputLimits};
use nix::errno::Errno;
use nix::unistd::Pid;
use std::ffi::OsStr;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbandonReason {
    Deadline,
    Cancelled,
}

/// Runs a single subprocess to completion or deadline
#[derive(Debug, Clone)]
pub struct Supervisor {
    kill_grace: Duration,
    drain_timeout: Duration,
    limits: OutputLimits,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

impl Supervisor {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            kill_grace: config.kill_grace(),
            drain_timeout: config.drain_timeout(),
            limits: OutputLimits {
                stdout_limit: config.stdout_limit,
                stderr_limit: config.stderr_limit,
            },
        }
    }

    /// Run `binary args..` until it exits or `deadline` elapses.
    pub fn run<I, S>(&self, binary: &Path, args: I, deadline: Duration) -> ExecutionOutcome
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.supervise(binary, args, deadline, None)
    }

    /// Like [`Supervisor::run`], also returning early once `cancel` is set.
    pub fn run_with_cancel<I, S>(
        &self,
        binary: &Path,
        args: I,
        deadline: Duration,
        cancel: &CancelToken,
    ) -> ExecutionOutcome
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.supervise(binary, args, deadline, Some(cancel))
    }

    fn supervise<I, S>(
        &self,
        binary: &Path,
        args: I,
        deadline: Duration,
        cancel: Option<&CancelToken>,
    ) -> ExecutionOutcome
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let cause = format!("{}: {}", binary.display(), e);
                events::launch_failure(binary, &e.to_string());
                return ExecutionOutcome::LaunchFailed { cause };
            }
        };

        let pid = child.id();
        // process_group(0) makes the child its own group leader.
        let pgid = Pid::from_raw(pid as i32);
        let started = Instant::now();

        let collector =
            match OutputCollector::spawn(child.stdout.take(), child.stderr.take(), self.limits) {
                Ok(collector) => collector,
                Err(e) => {
                    terminate_group(pgid, Duration::ZERO, || false);
                    let _ = child.wait();
                    return ExecutionOutcome::LaunchFailed {
                        cause: e.to_string(),
                    };
                }
            };

        // The leader is only observed here, never reaped, so its pid keeps the
        // group id reserved until stragglers have been signalled.
        loop {
            match leader_exited(pgid) {
                Ok(true) => break,
                Ok(false) => {
                    let elapsed = started.elapsed();
                    if elapsed >= deadline {
                        events::wall_time_limit(pid, deadline);
                        return self.abandon(child, pgid, collector, AbandonReason::Deadline);
                    }
                    if cancel.map_or(false, CancelToken::is_cancelled) {
                        events::cancelled(pid);
                        return self.abandon(child, pgid, collector, AbandonReason::Cancelled);
                    }
                    std::thread::sleep(POLL_INTERVAL.min(deadline - elapsed));
                }
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    log::error!("wait on interpreter pid {} failed: {}", pid, e);
                    terminate_group(pgid, Duration::ZERO, || false);
                    let _ = child.wait();
                    let _ = collector.finish(self.drain_timeout);
                    return ExecutionOutcome::LaunchFailed {
                        cause: format!("lost track of interpreter process: {}", e),
                    };
                }
            }
        }

        if kill_stragglers(pgid) {
            events::group_kill(
                pid,
                "killed descendants that outlived the interpreter".to_string(),
            );
        }

        let exit_status = match child.wait() {
            Ok(status) => status,
            Err(e) => {
                log::error!("reaping interpreter pid {} failed: {}", pid, e);
                let _ = collector.finish(self.drain_timeout);
                return ExecutionOutcome::LaunchFailed {
                    cause: format!("lost track of interpreter process: {}", e),
                };
            }
        };

        let output = self.collect(pid, collector);
        log::debug!(
            "interpreter pid {} exited with {} after {}ms",
            pid,
            exit_status,
            started.elapsed().as_millis()
        );

        ExecutionOutcome::Completed {
            integrity: output.combined_integrity(),
            stdout: output.stdout.into_string(),
            stderr: output.stderr.into_string(),
            exit_status,
        }
    }

    fn collect(
        &self,
        pid: u32,
        collector: OutputCollector,
    ) -> crate::utils::output::OutputResult {
        let output = collector.finish(self.drain_timeout);

        if output.stdout.integrity == OutputIntegrity::TruncatedByLimit {
            events::output_limit(pid, "stdout", self.limits.stdout_limit);
        }
        if output.stderr.integrity == OutputIntegrity::TruncatedByLimit {
            events::output_limit(pid, "stderr", self.limits.stderr_limit);
        }
        if output.combined_integrity() == OutputIntegrity::CollectorTimeout {
            log::warn!(
                "output of pid {} not drained within {}ms, keeping partial output; a detached descendant may hold the pipe",
                pid,
                self.drain_timeout.as_millis()
            );
        }

        output
    }

    fn abandon(
        &self,
        mut child: Child,
        pgid: Pid,
        collector: OutputCollector,
        reason: AbandonReason,
    ) -> ExecutionOutcome {
        let report = terminate_group(pgid, self.kill_grace, || {
            matches!(leader_exited(pgid), Ok(true))
        });
        if let Err(e) = child.wait() {
            log::warn!("reaping pid {} failed: {}", child.id(), e);
        }
        events::group_kill(
            child.id(),
            format!(
                "term_sent={} kill_sent={} exited_in_grace={} waited_ms={}",
                report.term_sent, report.kill_sent, report.exited_in_grace, report.waited_ms
            ),
        );

        // Partial output is never reported; joining just releases the readers.
        let _ = collector.finish(self.drain_timeout);

        match reason {
            AbandonReason::Deadline => ExecutionOutcome::TimedOut,
            AbandonReason::Cancelled => ExecutionOutcome::Cancelled,
        }
    }
}
