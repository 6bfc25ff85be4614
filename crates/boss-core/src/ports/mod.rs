//! Port definitions (trait abstractions) for the supervisor's collaborators.
//!
//! Ports define what the supervisor expects from infrastructure without
//! committing to an implementation, so every collaborator can be replaced by
//! a mock in tests.
//!
//! # Design Rules
//!
//! - Express intent, not implementation detail
//! - Expected failures are values (`Option`, `bool`), not panics
//! - All ports are object-safe and shared as `Arc<dyn Trait>`

pub mod health_checker;
pub mod process_controller;
pub mod state_store;
pub mod updater;

use thiserror::Error;

pub use health_checker::HealthChecker;
pub use process_controller::{LaunchResult, ProcessController, ProcessHandle};
pub use state_store::StateStore;
pub use updater::{RestartSink, ServerUpdater};

/// Domain errors for process controller operations.
///
/// Most port methods report failure through their return values; this type
/// exists for the few paths where the caller needs a reason to log.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Neither the primary nor the fallback binary could be launched.
    #[error("failed to launch sidecar: {0}")]
    LaunchFailed(String),

    /// The process is not running.
    #[error("process not running: pid {0}")]
    NotRunning(u32),

    /// Internal process error.
    #[error("internal process error: {0}")]
    Internal(String),
}
