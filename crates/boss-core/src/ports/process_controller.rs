//! Process controller port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ServerLaunchConfig;

/// Handle to a launched sidecar process.
///
/// Carries exactly what orphan recovery needs: the PID plus the OS-reported
/// creation timestamp that disambiguates PID reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub pid: u32,
    /// Seconds since the epoch; `0` when the OS did not report it.
    pub creation_time: u64,
}

impl ProcessHandle {
    #[must_use]
    pub const fn new(pid: u32, creation_time: u64) -> Self {
        Self { pid, creation_time }
    }
}

/// Outcome of a launch attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchResult {
    /// `None` iff both the primary and the fallback attempt failed.
    pub process: Option<ProcessHandle>,
    /// True when the bundled fallback binary was used instead of the
    /// primary. The supervisor invalidates the downloaded version when this
    /// is set.
    pub used_fallback: bool,
}

/// Launches and terminates the sidecar process.
///
/// Blocking filesystem checks are permitted inside `launch`; callers run on
/// the async runtime and the implementation offloads as needed.
#[async_trait]
pub trait ProcessController: Send + Sync {
    /// Attempt `config.paths.exe` first; on a missing or unlaunchable
    /// binary, fall back to `config.paths.fallback_exe` and set
    /// `used_fallback`.
    async fn launch(&self, config: &ServerLaunchConfig) -> LaunchResult;

    /// Terminate a process: platform-appropriate graceful signal first,
    /// forced kill after a bounded grace period. `force` skips the graceful
    /// step. A process that is already gone is a successful terminate.
    async fn terminate(&self, process: &ProcessHandle, force: bool);
}
