//! Server termination.
//!
//! A running server first receives `SIGTERM`. If it is still alive after the
//! grace period it is killed. Either way the child is reaped before
//! returning.

use std::io;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::PROCESS_TARGET;
use super::error::ProcessError;

/// Default time a server is given to exit after `SIGTERM`.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a server came to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had exited before it was signalled.
    AlreadyExited(ExitStatus),
    /// The process exited within the grace period.
    Graceful(ExitStatus),
    /// The process ignored `SIGTERM` and was killed.
    Killed(ExitStatus),
}

/// Terminates `child`, escalating to a kill after `grace`.
pub(super) fn terminate_child(
    child: &mut Child,
    grace: Duration,
) -> Result<Termination, ProcessError> {
    let pid = child.id();
    let monitor = |source| ProcessError::Monitor { source };
    if let Some(status) = child.try_wait().map_err(monitor)? {
        debug!(target: PROCESS_TARGET, pid, ?status, "server had already exited");
        return Ok(Termination::AlreadyExited(status));
    }

    match signal_terminate(pid) {
        Ok(()) => {
            if let Some(status) = wait_for_exit(child, grace).map_err(monitor)? {
                debug!(target: PROCESS_TARGET, pid, ?status, "server exited after SIGTERM");
                return Ok(Termination::Graceful(status));
            }
            warn!(
                target: PROCESS_TARGET,
                pid,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "server ignored SIGTERM, killing"
            );
        }
        Err(error) => {
            warn!(
                target: PROCESS_TARGET,
                pid,
                error = %error,
                "failed to deliver SIGTERM, killing"
            );
        }
    }

    if let Err(source) = child.kill() {
        // The child may have exited between the last poll and the kill.
        if let Some(status) = child.try_wait().map_err(monitor)? {
            return Ok(Termination::Graceful(status));
        }
        return Err(ProcessError::Signal { pid, source });
    }
    let status = child
        .wait()
        .map_err(|source| ProcessError::Reap { pid, source })?;
    Ok(Termination::Killed(status))
}

fn wait_for_exit(child: &mut Child, grace: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + grace;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn signal_terminate(pid: u32) -> Result<(), ProcessError> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| ProcessError::Signal {
        pid,
        source: io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"),
    })?;
    kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|errno| ProcessError::Signal {
        pid,
        source: io::Error::from(errno),
    })
}

#[cfg(not(unix))]
fn signal_terminate(pid: u32) -> Result<(), ProcessError> {
    Err(ProcessError::Signal {
        pid,
        source: io::Error::new(
            io::ErrorKind::Unsupported,
            "graceful termination is unsupported on this platform",
        ),
    })
}
