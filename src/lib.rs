//! # boss: BrowserOS server supervisor
//!
//! Facade over the workspace crates. Embedders depend on this crate and get
//! the full assembly:
//!
//! - `boss_core`: domain types, collaborator ports, prefs and events
//! - `boss_runtime`: process control, health probing, OTA updates, and the
//!   supervisor itself
//!
//! ```no_run
//! use std::sync::Arc;
//! use boss::{DataLayout, MemoryPrefStore, NoopMetrics, SupervisorOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let options = SupervisorOptions::new(
//!     DataLayout::new("/home/user/UserData"),
//!     "/opt/app/resources/bin/browseros_server".into(),
//!     "/opt/app/resources".into(),
//! );
//! let supervisor = boss::bootstrap_supervisor(
//!     options,
//!     Arc::new(MemoryPrefStore::new()),
//!     Arc::new(NoopMetrics),
//! );
//! supervisor.start().await?;
//! # Ok(())
//! # }
//! ```

// Core domain types and ports
pub use boss_core::{
    DataLayout, HealthChecker, LaunchResult, MemoryPrefStore, MetricsSink, NoopMetrics,
    PrefStore, ProcessController, ProcessHandle, RestartSink, ServerIdentity,
    ServerLaunchConfig, ServerPaths, ServerPorts, ServerState, ServerUpdater, StateStore,
    SupervisorFlags, load_ports, store_ports,
};

// Runtime implementations and the supervisor
pub use boss_runtime::{
    FileStateStore, HttpHealthChecker, OtaUpdater, SidecarProcessController, Supervisor,
    SupervisorOptions, UpdateState, bootstrap_supervisor,
};

/// Re-export of `boss_core` for qualified access.
pub mod core {
    pub use boss_core::*;
}

/// Re-export of `boss_runtime` for qualified access.
pub mod runtime {
    pub use boss_runtime::*;
}
