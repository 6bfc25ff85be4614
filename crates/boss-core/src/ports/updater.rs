//! Updater port and the restart-request sink that breaks the
//! supervisor/updater reference cycle.

use std::path::PathBuf;

use async_trait::async_trait;

/// Over-the-air update engine for the sidecar binary.
///
/// `best_*_path` are pure reads of the cached version tuple and must not
/// block; the supervisor calls them while assembling every launch config.
#[async_trait]
pub trait ServerUpdater: Send + Sync {
    /// Bootstrap version caches and begin periodic update checks.
    async fn start(&self);

    /// Stop timers and drop in-flight work. Idempotent.
    fn stop(&self);

    /// True while an update traversal is running.
    fn is_update_in_progress(&self) -> bool;

    /// Force an immediate check. A no-op when one is already in progress.
    async fn check_now(&self);

    /// Downloaded binary iff `downloaded > bundled`, else the bundled one.
    fn best_server_binary_path(&self) -> PathBuf;

    /// Resources directory paired with [`Self::best_server_binary_path`].
    fn best_server_resources_path(&self) -> PathBuf;

    /// Forget every downloaded version: delete `current_version`, reset the
    /// cache, and remove the `versions/` tree. Called by the supervisor
    /// whenever a launch fell back to the bundled binary.
    async fn invalidate_downloaded_version(&self);
}

/// Narrow interface the updater holds onto the supervisor.
///
/// The updater needs two things back from its owner: a way to request the
/// hot-swap restart, and the MCP port for the `/status` gate. Keeping this
/// surface minimal avoids a full back-pointer between the two.
#[async_trait]
pub trait RestartSink: Send + Sync {
    /// Terminate and relaunch with freshly resolved paths. Returns `false`
    /// when the restart failed or another restart was already in progress.
    async fn request_restart(&self) -> bool;

    /// Currently resolved MCP port (`0` before start).
    fn mcp_port(&self) -> u16;
}
