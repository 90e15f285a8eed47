//! Signal handling for the runner
//!
//! Two concerns live here: tearing down a supervised process group, and
//! async-safe handling of signals delivered to the runner itself.

use log::{debug, info};
use nix::errno::Errno;
use nix::sys::signal::{self, killpg, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

const GRACE_POLL: Duration = Duration::from_millis(10);

/// What happened while tearing down a process group
#[derive(Debug, Clone, Default)]
pub struct KillReport {
    pub term_sent: bool,
    pub kill_sent: bool,
    /// The leader exited during the grace period
    pub exited_in_grace: bool,
    pub waited_ms: u64,
    pub notes: Vec<String>,
}

/// SIGTERM the group, give it `grace` to exit, then SIGKILL whatever remains.
///
/// `leader_exited` is polled during the grace period so a cooperative program
/// does not hold the caller for the full grace. SIGKILL is sent regardless,
/// since descendants may outlive the leader.
pub fn terminate_group<F>(pgid: Pid, grace: Duration, mut leader_exited: F) -> KillReport
where
    F: FnMut() -> bool,
{
    let mut report = KillReport::default();
    let start = Instant::now();

    match killpg(pgid, Signal::SIGTERM) {
        Ok(()) => report.term_sent = true,
        Err(Errno::ESRCH) => report.notes.push("group already gone before SIGTERM".to_string()),
        Err(e) => report.notes.push(format!("group SIGTERM failed: {}", e)),
    }

    if report.term_sent {
        while start.elapsed() < grace {
            if leader_exited() {
                report.exited_in_grace = true;
                break;
            }
            std::thread::sleep(GRACE_POLL);
        }
    }

    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) => report.kill_sent = true,
        Err(Errno::ESRCH) => {}
        Err(e) => report.notes.push(format!("group SIGKILL failed: {}", e)),
    }

    report.waited_ms = start.elapsed().as_millis() as u64;
    debug!("terminated process group {}: {:?}", pgid, report);
    report
}

/// Whether child `pid` has exited, without reaping it.
///
/// An exited but unreaped leader keeps its pid, and with it the process group
/// id, reserved, so the group can still be signalled safely afterwards.
pub fn leader_exited(pid: Pid) -> nix::Result<bool> {
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    match waitid(Id::Pid(pid), flags)? {
        WaitStatus::StillAlive => Ok(false),
        _ => Ok(true),
    }
}

/// SIGKILL every live member left in the group. Returns true if any was signalled.
///
/// Call this before reaping the leader; see [`leader_exited`].
pub fn kill_stragglers(pgid: Pid) -> bool {
    if group_members(pgid).is_empty() {
        return false;
    }
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            debug!("SIGKILL for group {} failed: {}", pgid, e);
            false
        }
    }
}

/// Live (non-zombie) members of a process group, read from /proc.
pub fn group_members(pgid: Pid) -> Vec<i32> {
    let entries = match std::fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(e) => {
            debug!("cannot scan /proc: {}", e);
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
        .filter(|pid| {
            let stat = match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
                Ok(stat) => stat,
                Err(_) => return false,
            };
            matches!(parse_stat(&stat), Some((state, pgrp)) if pgrp == pgid.as_raw() && state != 'Z' && state != 'X')
        })
        .collect()
}

/// (state, pgrp) from a /proc/<pid>/stat line. comm may contain spaces and parens.
fn parse_stat(stat: &str) -> Option<(char, i32)> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let _ppid = fields.next()?;
    let pgrp = fields.next()?.parse().ok()?;
    Some((state, pgrp))
}

/// True while any live process remains in the group.
pub fn group_exists(pgid: Pid) -> bool {
    if matches!(killpg(pgid, None), Err(Errno::ESRCH)) {
        return false;
    }
    !group_members(pgid).is_empty()
}

/// Global shutdown flag (async-safe atomic)
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Global signal received (async-safe atomic)
static SIGNAL_RECEIVED: AtomicU32 = AtomicU32::new(0);

/// Handler for SIGINT/SIGTERM/SIGHUP delivered to the runner process
pub struct SignalHandler;

impl SignalHandler {
    /// Must be called early in main() before any threads are spawned
    pub fn init() -> Result<Self, String> {
        let sig_action = SigAction::new(
            SigHandler::Handler(Self::signal_handler),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        // SAFETY: the handler only stores to atomics, which is async-signal-safe.
        unsafe {
            signal::sigaction(Signal::SIGINT, &sig_action)
                .map_err(|e| format!("Failed to install SIGINT handler: {}", e))?;
            signal::sigaction(Signal::SIGTERM, &sig_action)
                .map_err(|e| format!("Failed to install SIGTERM handler: {}", e))?;
            signal::sigaction(Signal::SIGHUP, &sig_action)
                .map_err(|e| format!("Failed to install SIGHUP handler: {}", e))?;
        }

        info!("Signal handlers installed (SIGINT, SIGTERM, SIGHUP)");
        Ok(Self)
    }

    /// Only performs atomic operations - no allocations, no locks, no I/O
    extern "C" fn signal_handler(signal: libc::c_int) {
        SIGNAL_RECEIVED.store(signal as u32, Ordering::SeqCst);
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
    }

    /// Signal that was received (0 if none)
    pub fn get_signal(&self) -> u32 {
        SIGNAL_RECEIVED.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub(crate) fn reset(&self) {
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
        SIGNAL_RECEIVED.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};

    fn spawn_group(script: &str) -> std::process::Child {
        Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .expect("spawn /bin/sh")
    }

    #[test]
    fn terminate_group_kills_leader_and_descendants() {
        let mut child = spawn_group("sleep 30 & sleep 30; wait");
        let pgid = Pid::from_raw(child.id() as i32);

        let report = terminate_group(pgid, Duration::from_millis(200), || {
            matches!(child.try_wait(), Ok(Some(_)))
        });
        let _ = child.wait();

        assert!(report.term_sent);
        let deadline = Instant::now() + Duration::from_secs(2);
        while group_exists(pgid) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!group_exists(pgid), "no member of the group may survive");
    }

    #[test]
    fn terminate_group_on_missing_group_is_harmless() {
        let mut child = spawn_group("exit 0");
        let pgid = Pid::from_raw(child.id() as i32);
        child.wait().unwrap();

        let report = terminate_group(pgid, Duration::from_millis(50), || true);
        assert!(!report.term_sent);
        assert!(!report.kill_sent);
        assert!(!kill_stragglers(pgid));
    }

    #[test]
    fn parse_stat_handles_parens_in_comm() {
        let line = "4242 (weird) name)) S 1 4240 4240 0 -1 4194304";
        assert_eq!(parse_stat(line), Some(('S', 4240)));
        assert_eq!(parse_stat("garbage"), None);
    }

    #[test]
    fn group_members_sees_running_group() {
        let mut child = spawn_group("sleep 30");
        let pgid = Pid::from_raw(child.id() as i32);

        assert!(group_members(pgid).contains(&pgid.as_raw()));
        assert!(group_exists(pgid));

        assert!(kill_stragglers(pgid));
        let _ = child.wait();
    }

    #[test]
    fn leader_exit_is_observed_without_reaping() {
        let mut child = spawn_group("sleep 30 & exit 0");
        let pgid = Pid::from_raw(child.id() as i32);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !leader_exited(pgid).unwrap() {
            assert!(Instant::now() < deadline, "leader never exited");
            std::thread::sleep(Duration::from_millis(10));
        }

        // Leader is a zombie, so the group id is still ours to signal.
        assert!(std::fs::metadata(format!("/proc/{}", pgid)).is_ok());
        assert!(kill_stragglers(pgid));

        let status = child.wait().unwrap();
        assert!(status.success());

        let deadline = Instant::now() + Duration::from_secs(2);
        while group_exists(pgid) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!group_exists(pgid));
    }

    #[test]
    fn kill_stragglers_ignores_a_lone_zombie_leader() {
        let mut child = spawn_group("exit 0");
        let pgid = Pid::from_raw(child.id() as i32);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !leader_exited(pgid).unwrap() {
            assert!(Instant::now() < deadline, "leader never exited");
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(!kill_stragglers(pgid));
        child.wait().unwrap();
    }

    #[test]
    fn test_shutdown_flag() {
        let handler = SignalHandler::init().unwrap();
        handler.reset();
        assert!(!handler.shutdown_requested());

        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        assert!(handler.shutdown_requested());

        handler.reset();
    }
}
