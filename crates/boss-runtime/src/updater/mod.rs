//! Over-the-air updates for the sidecar binary.
//!
//! Update flow:
//! 1. Fetch appcast XML from the CDN
//! 2. Parse and find the matching platform enclosure
//! 3. Download the ZIP if a newer version is available
//! 4. Verify the Ed25519 signature
//! 5. Extract to `versions/<version>/`
//! 6. Test the binary with `version`
//! 7. Gate on the sidecar's `/status` readiness
//! 8. Update `current_version` and ask the supervisor to restart
//!
//! Only one traversal runs at a time; the periodic timer and `check_now`
//! both bounce off an in-progress cycle.

mod version;

pub use version::{
    binary_version_output, delete_current_version_file, probe_binary_version,
    read_current_version_file, write_current_version_file,
};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use boss_core::config::{
    APPCAST_FETCH_TIMEOUT, DOWNLOAD_TIMEOUT, MAX_APPCAST_SIZE, MAX_VERSIONS_TO_KEEP,
    STATUS_PROBE_TIMEOUT, SupervisorFlags, UPDATE_CHECK_INTERVAL,
};
use boss_core::events::{OTA_BUSY, OTA_CLEANUP, OTA_ERROR, OTA_SUCCESS};
use boss_core::prefs::PREF_SERVER_VERSION;
use boss_core::{DataLayout, MetricsSink, PrefStore, RestartSink, ServerUpdater};
use futures_util::StreamExt;
use semver::Version;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::task::spawn_blocking;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::appcast;
use crate::archive::{extract_archive, remove_dir_if_present};
use crate::signature::{SERVER_UPDATE_PUBLIC_KEY, verify_ed25519};

/// Hard cap for downloads whose enclosure advertises `length="0"`.
const MAX_UNBOUNDED_DOWNLOAD_SIZE: u64 = 512 * 1024 * 1024;

/// Where an in-flight update currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    FetchingAppcast,
    Downloading,
    Verifying,
    Extracting,
    Testing,
    HotSwap,
}

#[derive(Debug)]
struct UpdaterInner {
    state: UpdateState,
    in_progress: bool,
    bundled_version: Option<Version>,
    downloaded_version: Option<Version>,
    versions_loaded: bool,
}

impl Default for UpdaterInner {
    fn default() -> Self {
        Self {
            state: UpdateState::Idle,
            in_progress: false,
            bundled_version: None,
            downloaded_version: None,
            versions_loaded: false,
        }
    }
}

/// The production [`ServerUpdater`].
pub struct OtaUpdater {
    layout: DataLayout,
    bundled_exe: PathBuf,
    bundled_resources: PathBuf,
    flags: SupervisorFlags,
    prefs: Arc<dyn PrefStore>,
    metrics: Arc<dyn MetricsSink>,
    host: Weak<dyn RestartSink>,
    http: reqwest::Client,
    public_key: Mutex<String>,
    inner: Mutex<UpdaterInner>,
    cancel: CancellationToken,
    periodic_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    weak_self: Weak<Self>,
}

impl OtaUpdater {
    /// `host` is the supervisor, reached only through the narrow restart
    /// sink so the two sides do not keep each other alive.
    pub fn new(
        layout: DataLayout,
        bundled_exe: PathBuf,
        bundled_resources: PathBuf,
        flags: SupervisorFlags,
        prefs: Arc<dyn PrefStore>,
        metrics: Arc<dyn MetricsSink>,
        host: Weak<dyn RestartSink>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            layout,
            bundled_exe,
            bundled_resources,
            flags,
            prefs,
            metrics,
            host,
            http: reqwest::Client::new(),
            public_key: Mutex::new(SERVER_UPDATE_PUBLIC_KEY.to_string()),
            inner: Mutex::new(UpdaterInner::default()),
            cancel: CancellationToken::new(),
            periodic_task: Mutex::new(None),
            weak_self: weak.clone(),
        })
    }

    /// Current pipeline state, for observability and tests.
    #[must_use]
    pub fn state(&self) -> UpdateState {
        self.inner.lock().unwrap().state
    }

    /// Replace the Ed25519 public key packages are verified against.
    /// Supports alternate release channels and test harnesses; production
    /// wiring keeps the baked-in key.
    pub fn set_update_public_key(&self, public_key_base64: &str) {
        *self.public_key.lock().unwrap() = public_key_base64.to_string();
    }

    fn set_state(&self, state: UpdateState) {
        self.inner.lock().unwrap().state = state;
    }

    fn reset_state(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = UpdateState::Idle;
        inner.in_progress = false;
    }

    /// `max(downloaded, bundled)`; `None` when neither is known.
    fn current_version(&self) -> Option<Version> {
        let inner = self.inner.lock().unwrap();
        match (&inner.downloaded_version, &inner.bundled_version) {
            (Some(d), Some(b)) => Some(if d > b { d.clone() } else { b.clone() }),
            (Some(d), None) => Some(d.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        }
    }

    /// Downloaded version iff it beats the bundled one.
    fn effective_downloaded(&self) -> Option<Version> {
        let inner = self.inner.lock().unwrap();
        match (&inner.downloaded_version, &inner.bundled_version) {
            (Some(d), Some(b)) if d > b => Some(d.clone()),
            (Some(d), None) => Some(d.clone()),
            _ => None,
        }
    }

    async fn bootstrap_versions(&self) {
        let downloaded = read_current_version_file(&self.layout.current_version_file()).await;
        if let Some(v) = &downloaded {
            info!(version = %v, "cached downloaded server version");
        }
        let bundled = probe_binary_version(&self.bundled_exe).await;
        match &bundled {
            Some(v) => info!(version = %v, "cached bundled server version"),
            None => warn!(binary = %self.bundled_exe.display(), "could not determine bundled server version"),
        }

        {
            let mut inner = self.inner.lock().unwrap();
            inner.downloaded_version = downloaded;
            inner.bundled_version = bundled;
            inner.versions_loaded = true;
        }

        let published = self
            .current_version()
            .map(|v| v.to_string())
            .unwrap_or_default();
        self.prefs.set_string(PREF_SERVER_VERSION, &published);
    }

    fn spawn_periodic_checks(&self) {
        let weak = self.weak_self.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(UPDATE_CHECK_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The immediate first tick duplicates the startup check.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(updater) = weak.upgrade() else { break };
                        updater.check_now().await;
                    }
                    () = cancel.cancelled() => break,
                }
            }
        });
        *self.periodic_task.lock().unwrap() = Some(handle);
    }

    /// Update cache, pref, and the `current_version` file together.
    /// `None` reverts to bundled.
    async fn set_current_version(&self, version: Option<&Version>) -> io::Result<()> {
        let bundled = {
            let mut inner = self.inner.lock().unwrap();
            inner.downloaded_version = version.cloned();
            inner.bundled_version.clone()
        };
        let published = version
            .map(ToString::to_string)
            .or_else(|| bundled.map(|v| v.to_string()))
            .unwrap_or_default();
        self.prefs.set_string(PREF_SERVER_VERSION, &published);

        let path = self.layout.current_version_file();
        match version {
            Some(v) => write_current_version_file(&path, v).await,
            None => delete_current_version_file(&path).await,
        }
    }

    async fn fetch_appcast(&self, url: &str) -> Result<String> {
        info!(url, "fetching appcast");
        let response = self
            .http
            .get(url)
            .timeout(APPCAST_FETCH_TIMEOUT)
            .send()
            .await
            .context("appcast request failed")?;
        if !response.status().is_success() {
            bail!("appcast fetch failed: HTTP {}", response.status());
        }

        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("error reading appcast stream")?;
            if body.len() as u64 + chunk.len() as u64 > MAX_APPCAST_SIZE {
                bail!("appcast exceeds {MAX_APPCAST_SIZE} bytes");
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn download_to_file(&self, url: &str, dest: &Path, expected_len: u64) -> Result<()> {
        let max = if expected_len > 0 {
            // Allow modest slack over the advertised enclosure length.
            expected_len + expected_len / 10
        } else {
            MAX_UNBOUNDED_DOWNLOAD_SIZE
        };

        info!(url, dest = %dest.display(), "downloading server package");
        let response = self
            .http
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .context("download request failed")?;
        if !response.status().is_success() {
            bail!("download failed: HTTP {}", response.status());
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("error reading download stream")?;
            downloaded += chunk.len() as u64;
            if downloaded > max {
                bail!("download exceeded size bound ({downloaded} > {max} bytes)");
            }
            file.write_all(&chunk)
                .await
                .context("error writing download file")?;
        }
        file.flush().await.context("error flushing download file")?;
        debug!(bytes = downloaded, "download complete");
        Ok(())
    }

    async fn prepare_pending_dir(&self) -> io::Result<()> {
        let dir = self.layout.pending_dir();
        spawn_blocking(move || -> io::Result<()> {
            remove_dir_if_present(&dir)?;
            std::fs::create_dir_all(&dir)
        })
        .await
        .map_err(io::Error::other)?
    }

    async fn cleanup_pending(&self) {
        let dir = self.layout.pending_dir();
        let result = spawn_blocking(move || remove_dir_if_present(&dir)).await;
        if let Ok(Err(e)) = result {
            warn!(error = %e, "failed to clean pending update dir");
        }
    }

    async fn cleanup_old_versions(&self) {
        let dir = self.layout.versions_dir();
        let deleted = spawn_blocking(move || prune_versions_dir(&dir, MAX_VERSIONS_TO_KEEP))
            .await
            .unwrap_or(0);
        if deleted > 0 {
            self.metrics
                .log(OTA_CLEANUP, json!({ "deleted_count": deleted }));
        }
    }

    /// Ask the sidecar whether a hot-swap is acceptable right now.
    /// Fail-open: any network or parse problem counts as "yes"; the gate
    /// only shifts timing, never correctness.
    async fn sidecar_can_update(&self, port: u16) -> bool {
        if port == 0 {
            return true;
        }
        let url = format!("http://127.0.0.1:{port}/status");
        let response = match self
            .http
            .get(&url)
            .timeout(STATUS_PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "status probe failed, proceeding with update");
                return true;
            }
        };
        match response.json::<Value>().await {
            Ok(body) => body
                .get("can_update")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            Err(e) => {
                warn!(error = %e, "status response unreadable, proceeding with update");
                true
            }
        }
    }

    async fn fail(&self, stage: &str, message: String, pending: Option<&Version>) {
        error!(stage, error = %message, "server update failed");

        let mut props = json!({ "stage": stage, "error": message });
        if let Some(v) = pending {
            props["version"] = json!(v.to_string());
        }
        self.metrics.log(OTA_ERROR, props);

        // A version directory that failed testing or hot-swap is poison;
        // remove it so the next cycle starts clean.
        if let Some(v) = pending {
            if stage == "test" || stage == "hotswap" {
                let dir = self.layout.version_dir(v);
                let _ = spawn_blocking(move || remove_dir_if_present(&dir)).await;
            }
        }
        self.cleanup_pending().await;
        self.reset_state();
    }

    async fn run_cycle(&self) {
        let url = self.flags.appcast_url().to_string();
        let xml = match self.fetch_appcast(&url).await {
            Ok(xml) => xml,
            Err(e) => return self.fail("check", e.to_string(), None).await,
        };

        let Some(item) = appcast::parse_latest(&xml) else {
            return self.fail("check", "failed to parse appcast XML".into(), None).await;
        };
        info!(version = %item.version, "latest version in appcast");

        let Some(enclosure) = item.enclosure_for_current_platform().cloned() else {
            return self
                .fail("check", "no enclosure for current platform".into(), None)
                .await;
        };

        let current = self.current_version();
        if let Some(current) = &current {
            if *current >= item.version {
                info!(%current, "server already up to date");
                self.reset_state();
                return;
            }
        }

        let version = item.version.clone();
        let version_dir = self.layout.version_dir(&version);
        let already_downloaded = tokio::fs::try_exists(&version_dir).await.unwrap_or(false);

        if already_downloaded {
            info!(%version, "version already on disk, skipping to test");
        } else {
            self.set_state(UpdateState::Downloading);
            if let Err(e) = self.prepare_pending_dir().await {
                return self
                    .fail("download", format!("failed to prepare pending dir: {e}"), Some(&version))
                    .await;
            }
            let archive_path = self.layout.pending_archive();
            if let Err(e) = self
                .download_to_file(&enclosure.url, &archive_path, enclosure.length)
                .await
            {
                return self.fail("download", e.to_string(), Some(&version)).await;
            }

            self.set_state(UpdateState::Verifying);
            let zip = archive_path.clone();
            let signature = enclosure.signature.clone();
            let public_key = self.public_key.lock().unwrap().clone();
            let verified = spawn_blocking(move || {
                let ok = verify_ed25519(&zip, &signature, &public_key);
                if !ok {
                    let _ = std::fs::remove_file(&zip);
                }
                ok
            })
            .await
            .unwrap_or(false);
            if !verified {
                return self
                    .fail("verify", "signature verification failed".into(), Some(&version))
                    .await;
            }

            self.set_state(UpdateState::Extracting);
            let zip = archive_path.clone();
            let dest = version_dir.clone();
            let extracted = spawn_blocking(move || -> Result<()> {
                // Stale directory from an interrupted update; start over.
                remove_dir_if_present(&dest).context("failed to clean stale version dir")?;
                let result = extract_archive(&zip, &dest);
                let _ = std::fs::remove_file(&zip);
                result
            })
            .await
            .map_err(|e| anyhow::anyhow!(e))
            .and_then(|r| r);
            if let Err(e) = extracted {
                return self.fail("extract", e.to_string(), Some(&version)).await;
            }
        }

        self.set_state(UpdateState::Testing);
        let binary = self.layout.downloaded_binary(&version);
        if let Err(e) = binary_version_output(&binary).await {
            return self.fail("test", e.to_string(), Some(&version)).await;
        }
        info!(%version, "downloaded binary passed version check");

        self.set_state(UpdateState::HotSwap);
        let Some(host) = self.host.upgrade() else {
            return self
                .fail("hotswap", "supervisor no longer available".into(), Some(&version))
                .await;
        };

        if !self.sidecar_can_update(host.mcp_port()).await {
            info!(%version, "server busy, deferring hot-swap to next cycle");
            self.metrics
                .log(OTA_BUSY, json!({ "pending_version": version.to_string() }));
            self.reset_state();
            return;
        }

        let old_version = current;
        if let Err(e) = self.set_current_version(Some(&version)).await {
            return self
                .fail("hotswap", format!("failed to write current_version: {e}"), Some(&version))
                .await;
        }

        if host.request_restart().await {
            info!(%version, "hot-swap complete");
            self.cleanup_old_versions().await;
            self.cleanup_pending().await;
            self.metrics.log(
                OTA_SUCCESS,
                json!({
                    "old_version": old_version
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "none".to_string()),
                    "new_version": version.to_string(),
                }),
            );
            self.reset_state();
        } else {
            // Revert to bundled so the next launch does not pick a binary
            // that just failed to come up.
            let _ = self.set_current_version(None).await;
            self.fail(
                "hotswap",
                "failed to restart server with new binary".into(),
                Some(&version),
            )
            .await;
        }
    }
}

#[async_trait]
impl ServerUpdater for OtaUpdater {
    async fn start(&self) {
        if self.flags.disable_updater {
            info!("server updater disabled by switch");
            return;
        }
        info!("starting server updater");
        self.bootstrap_versions().await;
        self.spawn_periodic_checks();

        // The first check runs off the caller's path: a cycle can spend
        // minutes downloading, and startup only has to wait for the version
        // bootstrap above.
        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            if let Some(updater) = weak.upgrade() {
                updater.check_now().await;
            }
        });
    }

    fn stop(&self) {
        info!("stopping server updater");
        self.cancel.cancel();
        if let Some(task) = self.periodic_task.lock().unwrap().take() {
            task.abort();
        }
        self.reset_state();
    }

    fn is_update_in_progress(&self) -> bool {
        self.inner.lock().unwrap().in_progress
    }

    async fn check_now(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.versions_loaded {
                info!("version caches not loaded yet, skipping check");
                return;
            }
            if inner.in_progress {
                info!("update check already in progress, skipping");
                return;
            }
            inner.in_progress = true;
            inner.state = UpdateState::FetchingAppcast;
        }

        tokio::select! {
            () = self.run_cycle() => {}
            () = self.cancel.cancelled() => {
                debug!("update cycle cancelled");
                self.reset_state();
            }
        }
    }

    fn best_server_binary_path(&self) -> PathBuf {
        match self.effective_downloaded() {
            Some(version) => self.layout.downloaded_binary(&version),
            None => self.bundled_exe.clone(),
        }
    }

    fn best_server_resources_path(&self) -> PathBuf {
        match self.effective_downloaded() {
            Some(version) => self.layout.downloaded_resources(&version),
            None => self.bundled_resources.clone(),
        }
    }

    async fn invalidate_downloaded_version(&self) {
        warn!("invalidating downloaded server versions");
        if let Err(e) = self.set_current_version(None).await {
            warn!(error = %e, "failed to clear current_version");
        }
        let versions_dir = self.layout.versions_dir();
        let result = spawn_blocking(move || remove_dir_if_present(&versions_dir)).await;
        if let Ok(Err(e)) = result {
            error!(error = %e, "failed to delete versions directory");
        }
    }
}

/// Keep the `keep` newest semver-named subdirectories, delete the rest.
/// Returns the number of directories removed.
fn prune_versions_dir(versions_dir: &Path, keep: usize) -> usize {
    let Ok(entries) = std::fs::read_dir(versions_dir) else {
        return 0;
    };

    let mut versions: Vec<(Version, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if !path.is_dir() {
                return None;
            }
            let name = path.file_name()?.to_str()?.to_string();
            Version::parse(&name).ok().map(|v| (v, path))
        })
        .collect();
    versions.sort_by(|a, b| b.0.cmp(&a.0));

    let mut deleted = 0;
    for (version, path) in versions.into_iter().skip(keep) {
        info!(%version, "cleaning up old server version");
        match std::fs::remove_dir_all(&path) {
            Ok(()) => deleted += 1,
            Err(e) => warn!(%version, error = %e, "failed to delete old version"),
        }
    }
    deleted
}
