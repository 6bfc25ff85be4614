//! Graceful process shutdown with polite-signal → forced-kill escalation.
//!
//! Two paths: `shutdown_child` for processes we own a `Child` handle for
//! (includes reaping), `kill_pid` for orphans recovered from a previous
//! embedder run (PID-only, no reaping possible).

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use boss_core::config::GRACEFUL_TERMINATE_TIMEOUT;
use tokio::process::Child;
use tokio::time::timeout;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Shut down an owned child process.
///
/// Unix: SIGTERM, wait out the grace period, then SIGKILL and reap.
/// Windows: terminate immediately (no graceful signal available here).
/// `force` skips the graceful phase entirely.
pub async fn shutdown_child(mut child: Child, force: bool) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        if !force {
            return shutdown_unix(&mut child).await;
        }
        child.kill().await?;
        child.wait().await
    }

    #[cfg(not(unix))]
    {
        let _ = force;
        child.kill().await?;
        child.wait().await
    }
}

#[cfg(unix)]
async fn shutdown_unix(child: &mut Child) -> io::Result<ExitStatus> {
    let pid = child
        .id()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "child has no PID"))?;

    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        if e == Errno::ESRCH {
            // Already exited; just reap.
            return child.wait().await;
        }
        return Err(io::Error::other(e));
    }

    if let Ok(result) = timeout(GRACEFUL_TERMINATE_TIMEOUT, child.wait()).await {
        return result;
    }

    child.kill().await?;
    child.wait().await
}

/// Kill a process we do not own by PID.
///
/// Caller is expected to have verified the PID belongs to our sidecar (the
/// supervisor matches the recorded creation time first). A process that is
/// already gone counts as success.
pub async fn kill_pid(pid: u32, force: bool) -> io::Result<()> {
    #[cfg(unix)]
    {
        kill_pid_unix(pid, force).await
    }

    #[cfg(not(unix))]
    {
        let _ = (pid, force);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "orphan kill by PID is not implemented on this platform",
        ))
    }
}

#[cfg(unix)]
async fn kill_pid_unix(pid: u32, force: bool) -> io::Result<()> {
    let nix_pid = Pid::from_raw(pid as i32);

    if !force {
        match signal::kill(nix_pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return Ok(()),
            Err(e) => return Err(io::Error::other(e)),
        }
        if wait_for_exit(nix_pid, GRACEFUL_TERMINATE_TIMEOUT).await {
            return Ok(());
        }
    }

    match signal::kill(nix_pid, Signal::SIGKILL) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(()),
        Err(e) => return Err(io::Error::other(e)),
    }
    if wait_for_exit(nix_pid, GRACEFUL_TERMINATE_TIMEOUT).await {
        return Ok(());
    }

    Err(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("process {pid} did not exit after SIGKILL"),
    ))
}

/// Poll with the null signal until the process disappears or time runs out.
#[cfg(unix)]
async fn wait_for_exit(pid: Pid, grace: Duration) -> bool {
    let step = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while waited < grace {
        tokio::time::sleep(step).await;
        waited += step;
        match signal::kill(pid, None) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return true,
            Err(_) => {}
        }
    }
    false
}
