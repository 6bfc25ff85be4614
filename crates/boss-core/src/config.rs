//! Launch configuration value types and supervisor-wide constants.
//!
//! `ServerLaunchConfig` is assembled fresh before every launch because the
//! updater can change the binary/resources paths between restarts.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default CDP (DevTools protocol) port.
pub const DEFAULT_CDP_PORT: u16 = 9000;
/// Default MCP (HTTP API) port. Health and status probes target this port.
pub const DEFAULT_MCP_PORT: u16 = 9100;
/// Default extension bridge port.
pub const DEFAULT_EXTENSION_PORT: u16 = 9300;

/// Stable release feed.
pub const DEFAULT_APPCAST_URL: &str = "https://cdn.browseros.com/server/stable/appcast.xml";
/// Alpha release feed, selected by the `alpha_features` feature bit.
pub const ALPHA_APPCAST_URL: &str = "https://cdn.browseros.com/server/alpha/appcast.xml";

/// Sidecar binary file name inside `resources/bin/`.
#[cfg(windows)]
pub const SIDECAR_BINARY_NAME: &str = "browseros_server.exe";
#[cfg(not(windows))]
pub const SIDECAR_BINARY_NAME: &str = "browseros_server";

/// How often the supervisor probes `/health`.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Single `/health` probe timeout.
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Single `/status` probe timeout.
pub const STATUS_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// How often the updater checks the appcast feed.
pub const UPDATE_CHECK_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// Appcast fetch timeout.
pub const APPCAST_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Package download timeout.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Grace period between the polite terminate signal and the forced kill.
pub const GRACEFUL_TERMINATE_TIMEOUT: Duration = Duration::from_secs(3);

/// Appcast responses larger than this are rejected.
pub const MAX_APPCAST_SIZE: u64 = 1024 * 1024;
/// Downloaded version directories retained after a successful hot-swap.
pub const MAX_VERSIONS_TO_KEEP: usize = 3;
/// Consecutive health failures that escalate to a full port revalidation.
pub const HEALTH_FAILURES_BEFORE_REVALIDATION: u32 = 3;

/// Port assignments for all server endpoints.
///
/// The single source of truth for port configuration. `0` means unassigned;
/// after a successful `Supervisor::start` all three are resolved, pairwise
/// distinct, and above the well-known range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPorts {
    pub cdp: u16,
    pub mcp: u16,
    pub extension: u16,
}

impl ServerPorts {
    /// All three endpoints use documented defaults.
    #[must_use]
    pub const fn defaults() -> Self {
        Self {
            cdp: DEFAULT_CDP_PORT,
            mcp: DEFAULT_MCP_PORT,
            extension: DEFAULT_EXTENSION_PORT,
        }
    }

    /// True once every port is assigned.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.cdp != 0 && self.mcp != 0 && self.extension != 0
    }

    /// True when the three assignments do not collide.
    #[must_use]
    pub const fn is_distinct(&self) -> bool {
        self.cdp != self.mcp && self.cdp != self.extension && self.mcp != self.extension
    }
}

/// Filesystem paths needed to launch the server.
///
/// Computed fresh before each launch since the updater can change the
/// primary binary between restarts. The fallback pair always points at the
/// bundled install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerPaths {
    /// Primary binary (may be an OTA-downloaded version).
    pub exe: PathBuf,
    /// Bundled binary, always available as fallback.
    pub fallback_exe: PathBuf,
    /// Primary resources directory.
    pub resources: PathBuf,
    /// Bundled resources directory.
    pub fallback_resources: PathBuf,
    /// Runtime data root (`<user-data>/.browseros`).
    pub execution: PathBuf,
}

impl ServerPaths {
    /// True when the paths required for a launch attempt are set.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.exe.as_os_str().is_empty() && !self.execution.as_os_str().is_empty()
    }
}

/// Identity and versioning info handed to the sidecar. Opaque to the
/// supervisor core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub install_id: String,
    pub host_version: String,
    pub sidecar_version: String,
}

/// Complete configuration for a single server launch.
#[derive(Debug, Clone, Default)]
pub struct ServerLaunchConfig {
    pub ports: ServerPorts,
    pub paths: ServerPaths,
    pub identity: ServerIdentity,
    pub allow_remote_in_mcp: bool,
}

impl ServerLaunchConfig {
    /// True when the config can be handed to the process controller.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.ports.is_valid() && self.paths.is_valid()
    }
}

/// Command-line switches and feature bits the supervisor consumes on behalf
/// of the embedder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorFlags {
    /// `--disable-server`: start returns after loading prefs.
    pub disable_server: bool,
    /// `--disable-server-updater`: updater start is a no-op.
    pub disable_updater: bool,
    /// `--server-appcast-url=<url>`: overrides both stable and alpha feeds.
    pub appcast_url_override: Option<String>,
    /// Feature bit selecting the alpha feed.
    pub alpha_features: bool,
}

impl SupervisorFlags {
    /// Parse the switches out of the embedder's argument list. Unknown
    /// arguments are ignored; the embedder owns the rest of its command line.
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut flags = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            if arg == "--disable-server" {
                flags.disable_server = true;
            } else if arg == "--disable-server-updater" {
                flags.disable_updater = true;
            } else if let Some(url) = arg.strip_prefix("--server-appcast-url=") {
                if !url.is_empty() {
                    flags.appcast_url_override = Some(url.to_string());
                }
            }
        }
        flags
    }

    /// Feed URL selection: command-line override > alpha feed > stable feed.
    #[must_use]
    pub fn appcast_url(&self) -> &str {
        if let Some(url) = &self.appcast_url_override {
            return url;
        }
        if self.alpha_features {
            ALPHA_APPCAST_URL
        } else {
            DEFAULT_APPCAST_URL
        }
    }
}
