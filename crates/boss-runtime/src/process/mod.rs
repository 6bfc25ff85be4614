//! Sidecar process lifecycle: launch with fallback, graceful termination,
//! orphan kill.

mod inspect;
mod shutdown;

pub use inspect::process_creation_time;
pub use shutdown::{kill_pid, shutdown_child};

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use boss_core::{LaunchResult, ProcessController, ProcessHandle, ServerLaunchConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// `ProcessController` that spawns the real sidecar binary.
///
/// Owned children are tracked so termination can reap them; a terminate for
/// a PID we do not own (an orphan from a previous run) falls back to
/// signal-by-PID.
#[derive(Debug, Default)]
pub struct SidecarProcessController {
    children: Mutex<HashMap<u32, Child>>,
}

impl SidecarProcessController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn build_command(config: &ServerLaunchConfig, exe: &Path, resources: &Path) -> Command {
        let mut cmd = Command::new(exe);
        cmd.arg("--cdp-port")
            .arg(config.ports.cdp.to_string())
            .arg("--mcp-port")
            .arg(config.ports.mcp.to_string())
            .arg("--extension-port")
            .arg(config.ports.extension.to_string())
            .arg("--data-dir")
            .arg(&config.paths.execution)
            .arg("--resources-dir")
            .arg(resources)
            .arg("--install-id")
            .arg(&config.identity.install_id)
            .arg("--host-version")
            .arg(&config.identity.host_version);
        if config.allow_remote_in_mcp {
            cmd.arg("--allow-remote");
        }
        cmd.stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// One spawn attempt. `None` when the binary is missing or refuses to
    /// start.
    async fn try_spawn(config: &ServerLaunchConfig, exe: &Path, resources: &Path) -> Option<Child> {
        if exe.as_os_str().is_empty() {
            return None;
        }
        match tokio::fs::try_exists(exe).await {
            Ok(true) => {}
            _ => {
                debug!(exe = %exe.display(), "sidecar binary not found");
                return None;
            }
        }
        match Self::build_command(config, exe, resources).spawn() {
            Ok(child) => Some(child),
            Err(e) => {
                warn!(exe = %exe.display(), error = %e, "failed to spawn sidecar");
                None
            }
        }
    }

    fn forward_output(child: &mut Child, pid: u32) {
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(pid, "server: {}", line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(pid, "server! {}", line);
                }
            });
        }
    }
}

#[async_trait]
impl ProcessController for SidecarProcessController {
    async fn launch(&self, config: &ServerLaunchConfig) -> LaunchResult {
        let mut attempts: Vec<(&Path, &Path, bool)> = vec![(
            config.paths.exe.as_path(),
            config.paths.resources.as_path(),
            false,
        )];
        // Only try the bundled fallback when it is a different binary.
        if config.paths.fallback_exe != config.paths.exe
            && !config.paths.fallback_exe.as_os_str().is_empty()
        {
            attempts.push((
                config.paths.fallback_exe.as_path(),
                config.paths.fallback_resources.as_path(),
                true,
            ));
        }

        for (exe, resources, is_fallback) in attempts {
            let Some(mut child) = Self::try_spawn(config, exe, resources).await else {
                continue;
            };
            let Some(pid) = child.id() else {
                // Exited before we could even read the PID; treat as failed.
                let _ = child.wait().await;
                continue;
            };

            Self::forward_output(&mut child, pid);
            let creation_time = process_creation_time(pid).unwrap_or(0);
            self.children.lock().await.insert(pid, child);

            if is_fallback {
                warn!(pid, exe = %exe.display(), "launched sidecar with fallback binary");
            } else {
                info!(pid, exe = %exe.display(), "launched sidecar");
            }
            return LaunchResult {
                process: Some(ProcessHandle::new(pid, creation_time)),
                used_fallback: is_fallback,
            };
        }

        warn!("all sidecar launch attempts failed");
        LaunchResult {
            process: None,
            used_fallback: false,
        }
    }

    async fn terminate(&self, process: &ProcessHandle, force: bool) {
        let owned = self.children.lock().await.remove(&process.pid);
        match owned {
            Some(child) => {
                debug!(pid = process.pid, force, "terminating owned sidecar");
                if let Err(e) = shutdown_child(child, force).await {
                    debug!(pid = process.pid, error = %e, "terminate: process already gone");
                }
            }
            None => {
                debug!(pid = process.pid, force, "terminating unowned process by pid");
                if let Err(e) = kill_pid(process.pid, force).await {
                    debug!(pid = process.pid, error = %e, "pid kill failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boss_core::{ServerPaths, ServerPorts};
    use std::path::PathBuf;

    fn config_with_exes(exe: PathBuf, fallback: PathBuf) -> ServerLaunchConfig {
        ServerLaunchConfig {
            ports: ServerPorts::defaults(),
            paths: ServerPaths {
                exe,
                fallback_exe: fallback,
                resources: PathBuf::from("/tmp/resources"),
                fallback_resources: PathBuf::from("/tmp/resources"),
                execution: PathBuf::from("/tmp/.browseros"),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn launch_fails_when_both_binaries_missing() {
        let controller = SidecarProcessController::new();
        let config = config_with_exes(
            PathBuf::from("/nonexistent/primary"),
            PathBuf::from("/nonexistent/fallback"),
        );
        let result = controller.launch(&config).await;
        assert!(result.process.is_none());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn launch_falls_back_when_primary_missing() {
        let controller = SidecarProcessController::new();
        // `/bin/sleep` ignores our flags-as-arguments and just fails fast or
        // sleeps; either way the spawn itself succeeds.
        let config = config_with_exes(
            PathBuf::from("/nonexistent/primary"),
            PathBuf::from("/bin/sleep"),
        );
        let result = controller.launch(&config).await;
        let handle = result.process.expect("fallback should launch");
        assert!(result.used_fallback);

        controller.terminate(&handle, true).await;
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn terminate_is_silent_for_missing_process() {
        let controller = SidecarProcessController::new();
        controller
            .terminate(&ProcessHandle::new(999_999, 0), false)
            .await;
    }
}
