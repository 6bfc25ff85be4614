//! Persisted record of the supervised sidecar process.

use serde::{Deserialize, Serialize};

/// On-disk record used for orphan recovery across embedder crashes.
///
/// `creation_time` is the OS-reported process creation timestamp (seconds
/// since the epoch) and disambiguates PID reuse: a live process is only
/// treated as our orphan when both fields match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    pub pid: u32,
    pub creation_time: u64,
}

impl ServerState {
    #[must_use]
    pub const fn new(pid: u32, creation_time: u64) -> Self {
        Self { pid, creation_time }
    }
}
