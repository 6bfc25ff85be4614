//! Metrics event port.
//!
//! The supervisor surfaces nothing to the embedder's UI; everything it wants
//! to report goes through this fire-and-forget sink. Adapters convert events
//! to their native telemetry format.

use serde_json::Value;

/// Emitted when the sidecar reports it cannot be hot-swapped right now.
pub const OTA_BUSY: &str = "server.ota.busy";
/// Emitted after old version directories are pruned.
pub const OTA_CLEANUP: &str = "server.ota.cleanup";
/// Emitted on any update pipeline failure, with a `stage` property.
pub const OTA_ERROR: &str = "server.ota.error";
/// Emitted after a completed hot-swap.
pub const OTA_SUCCESS: &str = "server.ota.success";

/// Fire-and-forget metrics sink.
///
/// Methods never return errors; adapters handle delivery failures
/// internally.
pub trait MetricsSink: Send + Sync {
    fn log(&self, event: &str, props: Value);
}

/// No-op sink for tests and embedders without telemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn log(&self, _event: &str, _props: Value) {}
}
