//! Domain types and collaborator ports for the BrowserOS server supervisor.
//!
//! This crate holds everything the supervisor core shares with its
//! infrastructure: launch configuration value types, the persisted state
//! record, the on-disk layout, preference and metrics ports, and the trait
//! abstractions over the four testable collaborators (process controller,
//! health checker, state store, updater).
//!
//! Nothing here touches the network, spawns processes, or installs timers;
//! those concerns live in `boss-runtime`.

pub mod config;
pub mod events;
pub mod paths;
pub mod ports;
pub mod prefs;
pub mod state;

pub use config::{
    ServerIdentity, ServerLaunchConfig, ServerPaths, ServerPorts, SupervisorFlags,
};
pub use events::{MetricsSink, NoopMetrics};
pub use paths::DataLayout;
pub use ports::{
    HealthChecker, LaunchResult, ProcessController, ProcessError, ProcessHandle, RestartSink,
    ServerUpdater, StateStore,
};
pub use prefs::{MemoryPrefStore, PrefStore, load_ports, store_ports};
pub use state::ServerState;
