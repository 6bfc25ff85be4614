//! State store port.

use crate::state::ServerState;

/// Reads and writes the persisted `{pid, creation_time}` record.
///
/// Corruption policy: any parse failure on read is equivalent to absence; a
/// stale or mangled file must never prevent the supervisor from starting.
pub trait StateStore: Send + Sync {
    /// `None` if the file is absent or malformed.
    fn read(&self) -> Option<ServerState>;

    /// Persist the record. Returns `false` on I/O failure.
    fn write(&self, state: &ServerState) -> bool;

    /// Remove the record. Idempotent: an absent file is a success.
    fn delete(&self) -> bool;
}
