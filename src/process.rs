//! Process liveness, termination, and detached spawning.
//!
//! Jobs and Monitors are always started in their own process group so that
//! terminating the Runner never reaches them, and so that `stop` can signal
//! the provider together with everything it spawned.

use crate::error::{RunnerError, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Kernel clock ticks per second for `/proc/<pid>/stat` times.
const USER_HZ: f64 = 100.0;

const TERMINATE_POLL: Duration = Duration::from_millis(50);

/// How a termination request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process was already gone.
    AlreadyExited,
    /// Exited within the grace period after SIGTERM.
    Terminated,
    /// Needed SIGKILL.
    Killed,
}

impl Termination {
    /// Conventional shell exit code for a signalled process.
    pub fn signal_exit_code(self) -> i32 {
        match self {
            Termination::Killed => 137,
            _ => 143,
        }
    }
}

/// Whether `pid` names a live process.
///
/// Zombies count as dead: a reaped-later child of some other parent has
/// already exited for our purposes.
pub fn is_alive(pid: u32) -> bool {
    let Some(nix_pid) = to_pid(pid) else {
        return false;
    };

    match signal::kill(nix_pid, None) {
        Ok(()) | Err(Errno::EPERM) => !is_zombie(pid),
        Err(_) => false,
    }
}

fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
}

fn proc_stat_fields(pid: u32) -> Option<Vec<String>> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // The command name may contain spaces; fields resume after the last ')'.
    let rest = &stat[stat.rfind(')')? + 1..];
    Some(rest.split_whitespace().map(str::to_string).collect())
}

fn is_zombie(pid: u32) -> bool {
    proc_stat_fields(pid)
        .and_then(|fields| fields.first().cloned())
        .is_some_and(|state| state == "Z" || state == "X")
}

/// CPU seconds (user + system) consumed by `pid`, when the platform exposes it.
pub fn cpu_time_secs(pid: u32) -> Option<f64> {
    let fields = proc_stat_fields(pid)?;
    // After the command name: state is index 0, utime 11, stime 12.
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some((utime + stime) as f64 / USER_HZ)
}

/// Terminate a process group led by `pid`, escalating to SIGKILL.
///
/// Sends SIGTERM to the group, waits up to `grace` for the leader to exit,
/// then sends SIGKILL. Falls back to signalling the single pid when the group
/// cannot be addressed.
pub fn terminate_group(pid: u32, grace: Duration) -> Result<Termination> {
    let Some(nix_pid) = to_pid(pid) else {
        return Err(RunnerError::UserError(format!("invalid pid {}", pid)));
    };

    if !is_alive(pid) {
        return Ok(Termination::AlreadyExited);
    }

    send(nix_pid, Signal::SIGTERM)?;
    tracing::debug!(pid, "sent SIGTERM");

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            return Ok(Termination::Terminated);
        }
        std::thread::sleep(TERMINATE_POLL);
    }

    if !is_alive(pid) {
        return Ok(Termination::Terminated);
    }

    send(nix_pid, Signal::SIGKILL)?;
    tracing::debug!(pid, "sent SIGKILL");

    let deadline = Instant::now() + Duration::from_secs(2);
    while is_alive(pid) && Instant::now() < deadline {
        std::thread::sleep(TERMINATE_POLL);
    }
    Ok(Termination::Killed)
}

fn send(pid: Pid, sig: Signal) -> Result<()> {
    match signal::killpg(pid, sig) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(_) => match signal::kill(pid, sig) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                return Err(RunnerError::UserError(format!(
                    "failed to send {} to pid {}: {}",
                    sig, pid, e
                )));
            }
        },
    }
    Ok(())
}

/// Spawn `command` detached in a new process group and return its pid.
///
/// The child is not waited on; the caller records the pid and the child
/// outlives this process.
pub fn spawn_detached(mut command: Command, what: &str) -> Result<u32> {
    command.process_group(0);
    let child = command.spawn().map_err(|e| {
        RunnerError::LaunchFailed(format!(
            "failed to spawn {}: {}\n\
             Fix: ensure the executable is installed and in PATH.",
            what, e
        ))
    })?;
    Ok(child.id())
}

/// Open `path` for appending, creating it if needed.
pub fn append_stdio(path: &Path) -> Result<Stdio> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            RunnerError::UserError(format!(
                "failed to open log file '{}': {}",
                path.display(),
                e
            ))
        })?;
    Ok(Stdio::from(file))
}

/// Resolve an executable name against `PATH` (paths with a slash are checked directly).
pub fn find_executable(name: &str) -> Option<std::path::PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let is_exec = |p: &Path| {
        std::fs::metadata(p)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    };

    if name.contains('/') {
        let path = Path::new(name);
        return is_exec(path).then(|| path.to_path_buf());
    }

    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(name))
            .find(|candidate| is_exec(candidate))
    })
}
