//! Loopback port probing and allocation.

use std::collections::BTreeSet;
use std::net::TcpListener;

use tracing::debug;

/// How far past the starting port the search is allowed to walk.
const SEARCH_WINDOW: u16 = 128;

/// Check whether a port can be bound on loopback.
///
/// Ports in the well-known range (below 1024) are rejected outright; the
/// supervisor never assigns them. Binding and immediately dropping the
/// listener releases the port again.
#[must_use]
pub fn is_port_available(port: u16) -> bool {
    if port < 1024 {
        return false;
    }
    match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener.local_addr().is_ok(),
        Err(_) => false,
    }
}

/// Find the first bindable port at or after `start`, skipping `excluded`.
///
/// The search covers a bounded window; on exhaustion (or overflow past the
/// port space) returns `0` to signal failure.
#[must_use]
pub fn find_available(start: u16, excluded: &BTreeSet<u16>) -> u16 {
    for offset in 0..=SEARCH_WINDOW {
        let Some(port) = start.checked_add(offset) else {
            break;
        };
        if excluded.contains(&port) {
            continue;
        }
        if is_port_available(port) {
            debug!(port, start, "allocated available port");
            return port;
        }
    }
    debug!(start, window = SEARCH_WINDOW, "no available port in search window");
    0
}
