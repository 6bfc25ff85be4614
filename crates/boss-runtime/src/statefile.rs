//! File-backed state store for the `{pid, creation_time}` record.
//!
//! Format: compact JSON, e.g. `{"pid":12345,"creation_time":777}`.
//! Writes are atomic via temp file + rename.

use std::fs;
use std::io;
use std::path::PathBuf;

use boss_core::{ServerState, StateStore};
use tracing::{debug, warn};

/// `StateStore` persisting to `server.state` under the execution dir.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write_atomic(&self, json: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("state.tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &self.path)
    }
}

impl StateStore for FileStateStore {
    fn read(&self) -> Option<ServerState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read state file");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                // A mangled state file must never block startup.
                warn!(path = %self.path.display(), error = %e, "state file malformed, treating as absent");
                None
            }
        }
    }

    fn write(&self, state: &ServerState) -> bool {
        let json = match serde_json::to_string(state) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize server state");
                return false;
            }
        };
        match self.write_atomic(&json) {
            Ok(()) => {
                debug!(path = %self.path.display(), pid = state.pid, "wrote state file");
                true
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to write state file");
                false
            }
        }
    }

    fn delete(&self) -> bool {
        match fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to delete state file");
                false
            }
        }
    }
}
