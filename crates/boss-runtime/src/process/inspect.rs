//! Process inspection helpers built on sysinfo.

use sysinfo::{Pid, ProcessesToUpdate, System};

/// OS-reported creation time of a process, in seconds since the epoch.
///
/// `None` when the process does not exist (or is not visible yet, which can
/// briefly be the case right after a spawn).
#[must_use]
pub fn process_creation_time(pid: u32) -> Option<u64> {
    let mut system = System::new();
    let target = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    system.process(target).map(|p| p.start_time())
}
