//! Preference store contract and key registry.
//!
//! The embedder owns the actual preference storage (Chromium Local State or
//! equivalent); the supervisor only sees this narrow key/value port.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::{
    DEFAULT_CDP_PORT, DEFAULT_EXTENSION_PORT, DEFAULT_MCP_PORT, ServerPorts,
};

/// CDP server port.
pub const PREF_CDP_PORT: &str = "server.cdp_port";
/// MCP server port (HTTP).
pub const PREF_MCP_PORT: &str = "server.mcp_port";
/// Extension server port.
pub const PREF_EXTENSION_PORT: &str = "server.extension_port";
/// Allow remote connections to the MCP server (security setting).
pub const PREF_ALLOW_REMOTE_IN_MCP: &str = "server.allow_remote_in_mcp";
/// Server restart requested by the embedder (auto-reset after restart).
pub const PREF_RESTART_REQUESTED: &str = "server.restart_requested";
/// Currently active server version, for observability only.
pub const PREF_SERVER_VERSION: &str = "server.version";

/// Key/value port over the embedder's preference store.
///
/// Missing keys fall back to documented defaults on the read side; the
/// supervisor never requires a key to exist.
pub trait PrefStore: Send + Sync {
    fn get_int(&self, key: &str) -> Option<i64>;
    fn set_int(&self, key: &str, value: i64);
    fn get_bool(&self, key: &str) -> Option<bool>;
    fn set_bool(&self, key: &str, value: bool);
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&self, key: &str, value: &str);
}

/// A stored port is only trusted inside the user range; anything else
/// (missing, privileged, out of range) falls back to the default.
fn port_pref(prefs: &dyn PrefStore, key: &str, default: u16) -> u16 {
    match prefs.get_int(key) {
        Some(v) if (1024..=65535).contains(&v) => v as u16,
        _ => default,
    }
}

/// Load the port triple from prefs, defaulting each missing entry.
#[must_use]
pub fn load_ports(prefs: &dyn PrefStore) -> ServerPorts {
    ServerPorts {
        cdp: port_pref(prefs, PREF_CDP_PORT, DEFAULT_CDP_PORT),
        mcp: port_pref(prefs, PREF_MCP_PORT, DEFAULT_MCP_PORT),
        extension: port_pref(prefs, PREF_EXTENSION_PORT, DEFAULT_EXTENSION_PORT),
    }
}

/// Persist the resolved port triple back to prefs.
pub fn store_ports(prefs: &dyn PrefStore, ports: ServerPorts) {
    prefs.set_int(PREF_CDP_PORT, i64::from(ports.cdp));
    prefs.set_int(PREF_MCP_PORT, i64::from(ports.mcp));
    prefs.set_int(PREF_EXTENSION_PORT, i64::from(ports.extension));
}

#[derive(Debug, Clone)]
enum PrefValue {
    Int(i64),
    Bool(bool),
    Text(String),
}

/// In-memory `PrefStore` for tests and embedder-less runs.
#[derive(Debug, Default)]
pub struct MemoryPrefStore {
    values: RwLock<HashMap<String, PrefValue>>,
}

impl MemoryPrefStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PrefStore for MemoryPrefStore {
    fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.read().unwrap().get(key) {
            Some(PrefValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    fn set_int(&self, key: &str, value: i64) {
        self.values
            .write()
            .unwrap()
            .insert(key.to_string(), PrefValue::Int(value));
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.read().unwrap().get(key) {
            Some(PrefValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    fn set_bool(&self, key: &str, value: bool) {
        self.values
            .write()
            .unwrap()
            .insert(key.to_string(), PrefValue::Bool(value));
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.values.read().unwrap().get(key) {
            Some(PrefValue::Text(v)) => Some(v.clone()),
            _ => None,
        }
    }

    fn set_string(&self, key: &str, value: &str) {
        self.values
            .write()
            .unwrap()
            .insert(key.to_string(), PrefValue::Text(value.to_string()));
    }
}
