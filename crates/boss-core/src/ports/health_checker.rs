//! Health checker port.

use async_trait::async_trait;

/// Single-shot HTTP health probe against the sidecar.
///
/// Abstracted so supervisor tests run without real network requests.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// One GET to `http://127.0.0.1:<port>/health` with a short timeout.
    /// `true` iff the response status is 200.
    async fn check_health(&self, port: u16) -> bool;
}
