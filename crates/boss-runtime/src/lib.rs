//! Runtime half of the BrowserOS server supervisor: concrete collaborators
//! (process control, health probing, state persistence, the OTA updater)
//! and the supervisor that owns them.
//!
//! The embedder normally calls [`bootstrap_supervisor`] once at startup and
//! keeps the returned `Arc<Supervisor>` for the lifetime of the process.

pub mod appcast;
pub mod archive;
pub mod health;
pub mod lockfile;
pub mod netports;
pub mod process;
pub mod signature;
pub mod statefile;
pub mod supervisor;
pub mod updater;

pub use appcast::{AppcastEnclosure, AppcastItem, parse_all, parse_latest};
pub use archive::extract_archive;
pub use health::HttpHealthChecker;
pub use lockfile::LockFile;
pub use netports::{find_available, is_port_available};
pub use process::SidecarProcessController;
pub use signature::{SERVER_UPDATE_PUBLIC_KEY, verify_ed25519};
pub use statefile::FileStateStore;
pub use supervisor::{Supervisor, SupervisorOptions};
pub use updater::{OtaUpdater, UpdateState};

use std::sync::Arc;

use boss_core::{MetricsSink, PrefStore, RestartSink};

/// Wire a supervisor with the production collaborators.
///
/// The updater reaches back into the supervisor only through the weak
/// restart sink, so dropping the returned `Arc` tears the whole assembly
/// down.
pub fn bootstrap_supervisor(
    options: SupervisorOptions,
    prefs: Arc<dyn PrefStore>,
    metrics: Arc<dyn MetricsSink>,
) -> Arc<Supervisor> {
    let supervisor = Supervisor::new(
        options.clone(),
        Arc::new(SidecarProcessController::new()),
        Arc::new(FileStateStore::new(options.layout.state_file())),
        Arc::new(HttpHealthChecker::new()),
        prefs.clone(),
    );

    let host: Arc<dyn RestartSink> = supervisor.clone();
    let updater = OtaUpdater::new(
        options.layout,
        options.bundled_exe,
        options.bundled_resources,
        options.flags,
        prefs,
        metrics,
        Arc::downgrade(&host),
    );
    supervisor.set_updater(updater);
    supervisor
}
