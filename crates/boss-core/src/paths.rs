//! On-disk layout under the execution directory.
//!
//! Everything the supervisor and updater persist lives under
//! `<user-data>/.browseros`:
//!
//! ```text
//! .browseros/
//!   server.lock            advisory lock, held while a supervisor runs
//!   server.state           {pid, creation_time} for orphan recovery
//!   current_version        plain-text semver; absent = bundled is current
//!   versions/<semver>/resources/bin/browseros_server[.exe]
//!   pending/download.zip   transient download staging
//! ```

use std::io;
use std::path::{Path, PathBuf};

use semver::Version;

use crate::config::SIDECAR_BINARY_NAME;

/// Directory name under the embedder's user-data dir.
pub const DATA_DIR_NAME: &str = ".browseros";
pub const LOCK_FILE_NAME: &str = "server.lock";
pub const STATE_FILE_NAME: &str = "server.state";
pub const CURRENT_VERSION_FILE_NAME: &str = "current_version";
pub const VERSIONS_DIR_NAME: &str = "versions";
pub const PENDING_DIR_NAME: &str = "pending";
pub const DOWNLOAD_FILE_NAME: &str = "download.zip";

/// Resolved layout of the runtime data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    execution: PathBuf,
}

impl DataLayout {
    /// Layout rooted at `<user_data_dir>/.browseros`.
    #[must_use]
    pub fn new(user_data_dir: impl AsRef<Path>) -> Self {
        Self {
            execution: user_data_dir.as_ref().join(DATA_DIR_NAME),
        }
    }

    /// Layout whose root IS the given directory (tests, custom embedders).
    #[must_use]
    pub fn at(execution_dir: impl Into<PathBuf>) -> Self {
        Self {
            execution: execution_dir.into(),
        }
    }

    /// The execution directory itself.
    #[must_use]
    pub fn execution_dir(&self) -> &Path {
        &self.execution
    }

    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.execution.join(LOCK_FILE_NAME)
    }

    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.execution.join(STATE_FILE_NAME)
    }

    #[must_use]
    pub fn current_version_file(&self) -> PathBuf {
        self.execution.join(CURRENT_VERSION_FILE_NAME)
    }

    #[must_use]
    pub fn versions_dir(&self) -> PathBuf {
        self.execution.join(VERSIONS_DIR_NAME)
    }

    #[must_use]
    pub fn version_dir(&self, version: &Version) -> PathBuf {
        self.versions_dir().join(version.to_string())
    }

    #[must_use]
    pub fn pending_dir(&self) -> PathBuf {
        self.execution.join(PENDING_DIR_NAME)
    }

    #[must_use]
    pub fn pending_archive(&self) -> PathBuf {
        self.pending_dir().join(DOWNLOAD_FILE_NAME)
    }

    /// Binary inside a downloaded version directory.
    #[must_use]
    pub fn downloaded_binary(&self, version: &Version) -> PathBuf {
        self.version_dir(version)
            .join("resources")
            .join("bin")
            .join(SIDECAR_BINARY_NAME)
    }

    /// Resources directory inside a downloaded version directory.
    #[must_use]
    pub fn downloaded_resources(&self, version: &Version) -> PathBuf {
        self.version_dir(version).join("resources")
    }

    /// Create the execution directory if it does not exist yet.
    pub fn ensure_execution_dir(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.execution)
    }
}
