//! The supervisor: owns the sidecar's lifecycle end to end.
//!
//! Start acquires the data-dir lock, recovers orphans from a previous
//! embedder run, resolves the port triple, launches the sidecar, and begins
//! periodic health checking. Health failures escalate: the first two
//! trigger targeted restarts on the existing ports, the third a full port
//! revalidation from defaults. Update-driven restarts arrive through
//! [`boss_core::RestartSink`] and share the same single-restart gate.
//!
//! Lifecycle: `NotRunning → Starting → Running ⇄ Restarting → Stopping →
//! NotRunning`, tracked by the `running` field plus the restart gate.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use boss_core::config::{HEALTH_CHECK_INTERVAL, HEALTH_FAILURES_BEFORE_REVALIDATION};
use boss_core::prefs::{PREF_ALLOW_REMOTE_IN_MCP, PREF_RESTART_REQUESTED, PREF_SERVER_VERSION};
use boss_core::{
    DataLayout, HealthChecker, PrefStore, ProcessController, ProcessHandle, RestartSink,
    ServerIdentity, ServerLaunchConfig, ServerPaths, ServerPorts, ServerState, ServerUpdater,
    StateStore, SupervisorFlags, load_ports, store_ports,
};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lockfile::LockFile;
use crate::netports::{find_available, is_port_available};
use crate::process::process_creation_time;

/// Static configuration handed to the supervisor by the embedder.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// On-disk layout of the runtime data root.
    pub layout: DataLayout,
    /// Bundled sidecar binary, always present as launch fallback.
    pub bundled_exe: PathBuf,
    /// Bundled resources directory.
    pub bundled_resources: PathBuf,
    /// Identity block forwarded to the sidecar.
    pub identity: ServerIdentity,
    /// Parsed command-line switches and feature bits.
    pub flags: SupervisorFlags,
    /// Health probe cadence. Tests shorten this.
    pub health_interval: Duration,
}

impl SupervisorOptions {
    #[must_use]
    pub fn new(layout: DataLayout, bundled_exe: PathBuf, bundled_resources: PathBuf) -> Self {
        Self {
            layout,
            bundled_exe,
            bundled_resources,
            identity: ServerIdentity::default(),
            flags: SupervisorFlags::default(),
            health_interval: HEALTH_CHECK_INTERVAL,
        }
    }
}

#[derive(Debug, Default)]
struct SupervisorInner {
    running: bool,
    ports: ServerPorts,
    allow_remote_in_mcp: bool,
    current: Option<ProcessHandle>,
    consecutive_failures: u32,
    last_restart_revalidated: bool,
    lock: Option<LockFile>,
}

struct HealthLoop {
    task: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

/// Scope guard for the single-restart gate; clears the flag on every exit
/// path.
struct RestartGuard<'a> {
    restarting: &'a AtomicBool,
}

impl<'a> RestartGuard<'a> {
    fn try_acquire(restarting: &'a AtomicBool) -> Option<Self> {
        restarting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { restarting })
    }
}

impl Drop for RestartGuard<'_> {
    fn drop(&mut self) {
        self.restarting.store(false, Ordering::SeqCst);
    }
}

/// Owns everything: process lifecycle, health supervision, and the wiring
/// to the updater. One instance per embedder process, shared as `Arc`.
pub struct Supervisor {
    options: SupervisorOptions,
    process: Arc<dyn ProcessController>,
    state_store: Arc<dyn StateStore>,
    health: Arc<dyn HealthChecker>,
    prefs: Arc<dyn PrefStore>,
    updater: Mutex<Option<Arc<dyn ServerUpdater>>>,
    inner: Mutex<SupervisorInner>,
    restarting: AtomicBool,
    health_loop: Mutex<Option<HealthLoop>>,
    weak_self: Weak<Self>,
}

impl Supervisor {
    pub fn new(
        options: SupervisorOptions,
        process: Arc<dyn ProcessController>,
        state_store: Arc<dyn StateStore>,
        health: Arc<dyn HealthChecker>,
        prefs: Arc<dyn PrefStore>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            options,
            process,
            state_store,
            health,
            prefs,
            updater: Mutex::new(None),
            inner: Mutex::new(SupervisorInner::default()),
            restarting: AtomicBool::new(false),
            health_loop: Mutex::new(None),
            weak_self: weak.clone(),
        })
    }

    /// Attach the updater. Called once during wiring; the updater holds only
    /// a weak restart sink back.
    pub fn set_updater(&self, updater: Arc<dyn ServerUpdater>) {
        *self.updater.lock().unwrap() = Some(updater);
    }

    fn updater(&self) -> Option<Arc<dyn ServerUpdater>> {
        self.updater.lock().unwrap().clone()
    }

    // ----- observability ---------------------------------------------------

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().running
    }

    #[must_use]
    pub fn ports(&self) -> ServerPorts {
        self.inner.lock().unwrap().ports
    }

    #[must_use]
    pub fn cdp_port(&self) -> u16 {
        self.ports().cdp
    }

    #[must_use]
    pub fn mcp_port(&self) -> u16 {
        self.ports().mcp
    }

    #[must_use]
    pub fn extension_port(&self) -> u16 {
        self.ports().extension
    }

    #[must_use]
    pub fn is_allow_remote_in_mcp(&self) -> bool {
        self.inner.lock().unwrap().allow_remote_in_mcp
    }

    #[must_use]
    pub fn consecutive_health_check_failures(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_failures
    }

    #[must_use]
    pub fn did_last_restart_revalidate_all_ports(&self) -> bool {
        self.inner.lock().unwrap().last_restart_revalidated
    }

    /// Test hook mirroring the production `running` transition without a
    /// real launch.
    pub fn set_running_for_testing(&self, running: bool) {
        self.inner.lock().unwrap().running = running;
    }

    // ----- start / stop ----------------------------------------------------

    /// Bring the sidecar up. See module docs for the sequence.
    pub async fn start(&self) -> Result<()> {
        // Prefs load happens before the disable check so the embedder can
        // still observe the loaded values.
        {
            let mut inner = self.inner.lock().unwrap();
            inner.allow_remote_in_mcp = self
                .prefs
                .get_bool(PREF_ALLOW_REMOTE_IN_MCP)
                .unwrap_or(false);
            inner.ports = load_ports(self.prefs.as_ref());
        }

        if self.options.flags.disable_server {
            info!("server disabled by switch, not starting");
            return Ok(());
        }
        if self.is_running() {
            debug!("supervisor already running");
            return Ok(());
        }

        self.options
            .layout
            .ensure_execution_dir()
            .context("failed to create execution directory")?;

        let lock = match LockFile::acquire(self.options.layout.lock_file()) {
            Ok(lock) => lock,
            Err(e) => {
                warn!(error = %e, "another supervisor instance holds the server lock");
                bail!("server lock unavailable: {e}");
            }
        };
        self.inner.lock().unwrap().lock = Some(lock);

        self.recover_orphan().await;

        let loaded = self.ports();
        let Some(resolved) = self.resolve_ports(loaded) else {
            self.inner.lock().unwrap().lock = None;
            bail!("unable to resolve a usable port set");
        };
        self.inner.lock().unwrap().ports = resolved;
        store_ports(self.prefs.as_ref(), resolved);
        info!(
            cdp = resolved.cdp,
            mcp = resolved.mcp,
            extension = resolved.extension,
            "resolved server ports"
        );

        if !self.launch_and_record().await {
            self.inner.lock().unwrap().lock = None;
            bail!("failed to launch sidecar server");
        }
        self.inner.lock().unwrap().running = true;

        self.spawn_health_loop();
        if let Some(updater) = self.updater() {
            updater.start().await;
        }
        Ok(())
    }

    /// Tear everything down. Idempotent. The state file is deleted before
    /// the terminate so a crash mid-terminate leaves it absent, not stale.
    pub async fn stop(&self) {
        info!("stopping server supervisor");
        let current = {
            let mut inner = self.inner.lock().unwrap();
            inner.running = false;
            inner.current.take()
        };

        if let Some(health_loop) = self.health_loop.lock().unwrap().take() {
            health_loop.cancel.cancel();
            health_loop.task.abort();
        }
        if let Some(updater) = self.updater() {
            updater.stop();
        }

        self.state_store.delete();
        if let Some(handle) = current {
            self.process.terminate(&handle, false).await;
        }
        self.inner.lock().unwrap().lock = None;
    }

    // ----- orphan recovery -------------------------------------------------

    /// Kill a sidecar left behind by a crashed embedder. The recorded
    /// creation time must match the live process, otherwise the PID has
    /// been reused and is left alone. The state file goes away either way.
    async fn recover_orphan(&self) {
        let Some(state) = self.state_store.read() else {
            return;
        };
        match process_creation_time(state.pid) {
            Some(creation_time) if creation_time == state.creation_time => {
                warn!(pid = state.pid, "terminating orphaned sidecar from previous run");
                self.process
                    .terminate(&ProcessHandle::new(state.pid, state.creation_time), true)
                    .await;
            }
            Some(_) => {
                debug!(pid = state.pid, "recorded PID reused by another process, leaving it");
            }
            None => {
                debug!(pid = state.pid, "no live process with recorded PID");
            }
        }
        self.state_store.delete();
    }

    // ----- port resolution -------------------------------------------------

    /// Resolve each preferred port forward to a free one, keeping the three
    /// choices pairwise distinct. `None` when the search window exhausts.
    fn resolve_ports(&self, preferred: ServerPorts) -> Option<ServerPorts> {
        let mut excluded: BTreeSet<u16> = BTreeSet::new();
        let cdp = resolve_one(preferred.cdp, &mut excluded)?;
        let mcp = resolve_one(preferred.mcp, &mut excluded)?;
        let extension = resolve_one(preferred.extension, &mut excluded)?;
        Some(ServerPorts {
            cdp,
            mcp,
            extension,
        })
    }

    // ----- launching -------------------------------------------------------

    /// Config is rebuilt fresh for every launch: the updater may have
    /// changed the best binary since the last one.
    fn build_launch_config(&self) -> ServerLaunchConfig {
        let (ports, allow_remote) = {
            let inner = self.inner.lock().unwrap();
            (inner.ports, inner.allow_remote_in_mcp)
        };
        let (exe, resources) = match self.updater() {
            Some(updater) => (
                updater.best_server_binary_path(),
                updater.best_server_resources_path(),
            ),
            None => (
                self.options.bundled_exe.clone(),
                self.options.bundled_resources.clone(),
            ),
        };
        let mut identity = self.options.identity.clone();
        identity.sidecar_version = self
            .prefs
            .get_string(PREF_SERVER_VERSION)
            .unwrap_or_default();

        ServerLaunchConfig {
            ports,
            paths: ServerPaths {
                exe,
                fallback_exe: self.options.bundled_exe.clone(),
                resources,
                fallback_resources: self.options.bundled_resources.clone(),
                execution: self.options.layout.execution_dir().to_path_buf(),
            },
            identity,
            allow_remote_in_mcp: allow_remote,
        }
    }

    async fn launch_and_record(&self) -> bool {
        let config = self.build_launch_config();
        let result = self.process.launch(&config).await;
        let Some(handle) = result.process else {
            warn!("sidecar launch failed on both primary and fallback");
            return false;
        };

        if result.used_fallback {
            // The downloaded install could not start; forget it so we do
            // not keep retrying a broken binary.
            if let Some(updater) = self.updater() {
                updater.invalidate_downloaded_version().await;
            }
        }

        if !self
            .state_store
            .write(&ServerState::new(handle.pid, handle.creation_time))
        {
            warn!(pid = handle.pid, "failed to persist server state");
        }
        self.inner.lock().unwrap().current = Some(handle);
        true
    }

    // ----- health loop -----------------------------------------------------

    fn spawn_health_loop(&self) {
        let weak = self.weak_self.clone();
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let period = self.options.health_interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval fires immediately; the sidecar just launched, give it
            // one full period before the first probe.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(supervisor) = weak.upgrade() else { break };
                        supervisor.health_tick().await;
                    }
                    () = loop_cancel.cancelled() => break,
                }
            }
        });
        *self.health_loop.lock().unwrap() = Some(HealthLoop { task, cancel });
    }

    async fn health_tick(&self) {
        // Health probing is suspended while a restart is in flight.
        if self.restarting.load(Ordering::SeqCst) {
            return;
        }

        if self.prefs.get_bool(PREF_RESTART_REQUESTED).unwrap_or(false) {
            self.prefs.set_bool(PREF_RESTART_REQUESTED, false);
            info!("restart requested via preference");
            self.targeted_restart().await;
            return;
        }

        let (running, port) = {
            let inner = self.inner.lock().unwrap();
            (inner.running, inner.ports.mcp)
        };
        if !running {
            return;
        }

        let healthy = self.health.check_health(port).await;
        self.handle_health_result(healthy).await;
    }

    /// Apply one health probe outcome. Public so the health loop and tests
    /// share a single code path; results arriving after a stop are
    /// discarded.
    pub async fn handle_health_result(&self, healthy: bool) {
        let failures = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.running {
                return;
            }
            if healthy {
                if inner.consecutive_failures > 0 {
                    debug!(
                        failures = inner.consecutive_failures,
                        "server healthy again, resetting failure count"
                    );
                }
                inner.consecutive_failures = 0;
                return;
            }
            inner.consecutive_failures += 1;
            inner.consecutive_failures
        };

        warn!(failures, "server health check failed");
        if failures < HEALTH_FAILURES_BEFORE_REVALIDATION {
            {
                self.inner.lock().unwrap().last_restart_revalidated = false;
            }
            self.targeted_restart().await;
        } else {
            // The counter resets here unconditionally, before the restart
            // outcome is known.
            {
                let mut inner = self.inner.lock().unwrap();
                inner.consecutive_failures = 0;
                inner.last_restart_revalidated = true;
            }
            self.revalidation_restart().await;
        }
    }

    // ----- restarts --------------------------------------------------------

    /// Restart on the already-resolved ports.
    async fn targeted_restart(&self) -> bool {
        let Some(_guard) = RestartGuard::try_acquire(&self.restarting) else {
            debug!("restart already in progress, skipping targeted restart");
            return false;
        };
        info!("performing targeted server restart");
        self.perform_restart(false).await
    }

    /// Restart with all three ports re-resolved from defaults.
    async fn revalidation_restart(&self) -> bool {
        let Some(_guard) = RestartGuard::try_acquire(&self.restarting) else {
            debug!("restart already in progress, skipping revalidation restart");
            return false;
        };
        info!("performing full port revalidation restart");
        self.perform_restart(true).await
    }

    /// Terminate-then-launch. Never interleaves with another restart; the
    /// caller holds the restart gate.
    async fn perform_restart(&self, revalidate_ports: bool) -> bool {
        let current = self.inner.lock().unwrap().current.take();
        if let Some(handle) = current {
            self.process.terminate(&handle, false).await;
        }

        if revalidate_ports {
            let Some(resolved) = self.resolve_ports(ServerPorts::defaults()) else {
                warn!("port revalidation failed, no usable ports");
                return false;
            };
            self.inner.lock().unwrap().ports = resolved;
            store_ports(self.prefs.as_ref(), resolved);
            info!(
                cdp = resolved.cdp,
                mcp = resolved.mcp,
                extension = resolved.extension,
                "revalidated server ports"
            );
        }

        self.launch_and_record().await
    }

    /// Serialized restart for the updater's hot-swap. A second caller while
    /// one restart is in flight fails synchronously with `false` and
    /// mutates nothing; ports stay as they are in all cases.
    pub async fn restart_server_for_update(&self) -> bool {
        let Some(_guard) = RestartGuard::try_acquire(&self.restarting) else {
            info!("restart already in progress, rejecting update restart");
            return false;
        };
        info!("restarting server for update");
        self.perform_restart(false).await
    }
}

#[async_trait]
impl RestartSink for Supervisor {
    async fn request_restart(&self) -> bool {
        self.restart_server_for_update().await
    }

    fn mcp_port(&self) -> u16 {
        self.ports().mcp
    }
}

fn resolve_one(preferred: u16, excluded: &mut BTreeSet<u16>) -> Option<u16> {
    let chosen = if !excluded.contains(&preferred) && is_port_available(preferred) {
        preferred
    } else {
        let found = find_available(preferred, excluded);
        if found == 0 {
            return None;
        }
        found
    };
    excluded.insert(chosen);
    Some(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_one_skips_excluded_preferred_port() {
        let mut excluded: BTreeSet<u16> = BTreeSet::new();
        let first = resolve_one(19750, &mut excluded).unwrap();
        assert!(first >= 19750);

        // Same preferred port again must move forward even when the port
        // itself is free.
        let second = resolve_one(19750, &mut excluded).unwrap();
        assert_ne!(second, first);
    }

    #[test]
    fn resolved_triple_is_distinct_even_when_preferred_collide() {
        // All three preferences pointing at the same port.
        let mut excluded: BTreeSet<u16> = BTreeSet::new();
        let a = resolve_one(19800, &mut excluded).unwrap();
        let b = resolve_one(19800, &mut excluded).unwrap();
        let c = resolve_one(19800, &mut excluded).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }
}
