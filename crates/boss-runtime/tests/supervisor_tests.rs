//! Supervisor lifecycle, health escalation, and restart serialization tests
//! against mock collaborators.

mod common;

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use boss_core::prefs::{
    PREF_ALLOW_REMOTE_IN_MCP, PREF_MCP_PORT, PREF_RESTART_REQUESTED,
};
use boss_core::{MemoryPrefStore, PrefStore, ServerState, StateStore, SupervisorFlags};
#[cfg(unix)]
use boss_runtime::process::process_creation_time;
use boss_runtime::supervisor::{Supervisor, SupervisorOptions};

use common::{
    LaunchBehavior, MockHealthChecker, MockProcessController, MockStateStore, MockUpdater,
};

struct Fixture {
    supervisor: Arc<Supervisor>,
    process: Arc<MockProcessController>,
    state_store: Arc<MockStateStore>,
    health: Arc<MockHealthChecker>,
    prefs: Arc<MemoryPrefStore>,
    _data_dir: tempfile::TempDir,
}

fn fixture_with(
    flags: SupervisorFlags,
    health_interval: Duration,
    state_store: Arc<MockStateStore>,
) -> Fixture {
    let data_dir = tempfile::tempdir().unwrap();
    let layout = boss_core::DataLayout::at(data_dir.path().join(".browseros"));
    let mut options = SupervisorOptions::new(
        layout,
        data_dir.path().join("bundle/bin/browseros_server"),
        data_dir.path().join("bundle"),
    );
    options.flags = flags;
    options.health_interval = health_interval;

    let process = MockProcessController::new();
    let health = MockHealthChecker::new(true);
    let prefs = Arc::new(MemoryPrefStore::new());
    let supervisor = Supervisor::new(
        options,
        process.clone(),
        state_store.clone(),
        health.clone(),
        prefs.clone(),
    );
    Fixture {
        supervisor,
        process,
        state_store,
        health,
        prefs,
        _data_dir: data_dir,
    }
}

fn fixture() -> Fixture {
    fixture_with(
        SupervisorFlags::default(),
        Duration::from_secs(3600),
        MockStateStore::new(),
    )
}

// ----- initial state ---------------------------------------------------------

#[tokio::test]
async fn initially_not_running_with_zero_ports() {
    let f = fixture();
    assert!(!f.supervisor.is_running());
    assert_eq!(f.supervisor.cdp_port(), 0);
    assert_eq!(f.supervisor.mcp_port(), 0);
    assert_eq!(f.supervisor.extension_port(), 0);
}

// ----- health escalation ladder ----------------------------------------------

#[tokio::test]
async fn single_failure_increments_counter_without_revalidation() {
    let f = fixture();
    f.supervisor.set_running_for_testing(true);
    assert_eq!(f.supervisor.consecutive_health_check_failures(), 0);

    f.supervisor.handle_health_result(false).await;
    assert_eq!(f.supervisor.consecutive_health_check_failures(), 1);
    assert!(!f.supervisor.did_last_restart_revalidate_all_ports());
}

#[tokio::test]
async fn two_failures_still_no_full_revalidation() {
    let f = fixture();
    f.supervisor.set_running_for_testing(true);

    f.supervisor.handle_health_result(false).await;
    assert_eq!(f.supervisor.consecutive_health_check_failures(), 1);
    assert!(!f.supervisor.did_last_restart_revalidate_all_ports());

    f.supervisor.handle_health_result(false).await;
    assert_eq!(f.supervisor.consecutive_health_check_failures(), 2);
    assert!(!f.supervisor.did_last_restart_revalidate_all_ports());
}

#[tokio::test]
async fn three_consecutive_failures_trigger_full_revalidation() {
    let f = fixture();
    f.supervisor.set_running_for_testing(true);

    f.supervisor.handle_health_result(false).await;
    f.supervisor.handle_health_result(false).await;
    assert!(!f.supervisor.did_last_restart_revalidate_all_ports());

    f.supervisor.handle_health_result(false).await;
    assert!(f.supervisor.did_last_restart_revalidate_all_ports());
    assert_eq!(f.supervisor.consecutive_health_check_failures(), 0);

    // Revalidation re-resolves all three ports from defaults.
    let ports = f.supervisor.ports();
    assert!(ports.is_valid());
    assert!(ports.is_distinct());
    assert!(ports.cdp >= 1024 && ports.mcp >= 1024 && ports.extension >= 1024);
}

#[tokio::test]
async fn successful_probe_resets_failure_counter() {
    let f = fixture();
    f.supervisor.set_running_for_testing(true);

    f.supervisor.handle_health_result(false).await;
    f.supervisor.handle_health_result(false).await;
    assert_eq!(f.supervisor.consecutive_health_check_failures(), 2);

    f.supervisor.handle_health_result(true).await;
    assert_eq!(f.supervisor.consecutive_health_check_failures(), 0);
}

#[tokio::test]
async fn targeted_restarts_precede_revalidation() {
    let f = fixture();
    f.supervisor.set_running_for_testing(true);

    // Failures 1 and 2 each restart on the existing ports.
    f.supervisor.handle_health_result(false).await;
    f.supervisor.handle_health_result(false).await;
    assert_eq!(f.process.launch_count(), 2);
    assert!(!f.supervisor.did_last_restart_revalidate_all_ports());

    f.supervisor.handle_health_result(false).await;
    assert_eq!(f.process.launch_count(), 3);
    assert!(f.supervisor.did_last_restart_revalidate_all_ports());
}

#[tokio::test]
async fn health_results_after_stop_are_discarded() {
    let f = fixture();
    f.supervisor.set_running_for_testing(true);
    f.supervisor.handle_health_result(false).await;
    assert_eq!(f.supervisor.consecutive_health_check_failures(), 1);

    f.supervisor.stop().await;
    f.supervisor.handle_health_result(false).await;
    assert_eq!(f.supervisor.consecutive_health_check_failures(), 1);
    assert_eq!(f.process.launch_count(), 1);
}

// ----- stop ------------------------------------------------------------------

#[tokio::test]
async fn stop_calls_updater_stop_and_deletes_state() {
    let f = fixture();
    let updater = MockUpdater::new("/fake/binary".into(), "/fake/resources".into());
    f.supervisor.set_updater(updater.clone());
    f.supervisor.set_running_for_testing(true);

    f.supervisor.stop().await;

    assert!(!f.supervisor.is_running());
    assert_eq!(updater.stop_count(), 1);
    assert_eq!(f.state_store.delete_count(), 1);
    assert_eq!(f.state_store.read(), None);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let f = fixture();
    f.supervisor.set_running_for_testing(true);
    f.supervisor.stop().await;
    f.supervisor.stop().await;
    assert!(!f.supervisor.is_running());
}

// ----- restart serialization ---------------------------------------------------

#[tokio::test]
async fn concurrent_update_restart_fails_synchronously() {
    let f = fixture();
    f.supervisor.set_running_for_testing(true);
    f.process.set_launch_delay(Duration::from_millis(300));

    let first = {
        let supervisor = f.supervisor.clone();
        tokio::spawn(async move { supervisor.restart_server_for_update().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Second caller bounces off the restart gate immediately.
    assert!(!f.supervisor.restart_server_for_update().await);

    assert!(first.await.unwrap());
    assert_eq!(f.process.launch_count(), 1);
}

#[tokio::test]
async fn update_restart_keeps_existing_ports() {
    let f = fixture();
    f.supervisor.start().await.unwrap();
    let before = f.supervisor.ports();

    assert!(f.supervisor.restart_server_for_update().await);
    assert_eq!(f.supervisor.ports(), before);

    f.supervisor.stop().await;
}

#[tokio::test]
async fn failed_update_restart_reports_false() {
    let f = fixture();
    f.supervisor.set_running_for_testing(true);
    f.process.set_behavior(LaunchBehavior::Fail);
    assert!(!f.supervisor.restart_server_for_update().await);
}

// ----- fallback invalidation ----------------------------------------------------

#[tokio::test]
async fn launching_with_fallback_invalidates_downloaded_version() {
    let f = fixture();
    let updater = MockUpdater::new("/fake/binary".into(), "/fake/resources".into());
    f.supervisor.set_updater(updater.clone());
    f.process.set_behavior(LaunchBehavior::Fallback);

    f.supervisor.start().await.unwrap();
    assert_eq!(updater.invalidation_count(), 1);

    f.supervisor.stop().await;
}

// ----- start flow -----------------------------------------------------------------

#[tokio::test]
async fn cold_start_resolves_ports_and_persists_state() {
    let f = fixture();
    f.supervisor.start().await.unwrap();

    assert!(f.supervisor.is_running());
    let ports = f.supervisor.ports();
    assert!(ports.is_valid());
    assert!(ports.is_distinct());

    // Resolved ports are persisted back to prefs.
    assert_eq!(
        f.prefs.get_int(PREF_MCP_PORT),
        Some(i64::from(ports.mcp))
    );

    // Launch config carried the resolved ports and the bundled binary.
    let config = f.process.last_launch().expect("launch recorded");
    assert_eq!(config.ports, ports);
    assert!(config.paths.exe.ends_with("bundle/bin/browseros_server"));
    assert_eq!(config.paths.exe, config.paths.fallback_exe);

    // State record written with the launched PID.
    assert_eq!(f.state_store.write_count(), 1);
    let state = f.state_store.read().expect("state written");
    assert!(state.pid >= 1000);

    f.supervisor.stop().await;
    assert_eq!(f.state_store.read(), None);
    assert!(!f.supervisor.is_running());
}

#[tokio::test]
async fn disable_server_flag_skips_start_but_loads_prefs() {
    let flags = SupervisorFlags {
        disable_server: true,
        ..Default::default()
    };
    let f = fixture_with(flags, Duration::from_secs(3600), MockStateStore::new());
    f.prefs.set_bool(PREF_ALLOW_REMOTE_IN_MCP, true);

    assert!(!f.supervisor.is_allow_remote_in_mcp());
    f.supervisor.start().await.unwrap();

    assert!(!f.supervisor.is_running());
    assert!(f.supervisor.is_allow_remote_in_mcp());
    assert_eq!(f.process.launch_count(), 0);
}

#[tokio::test]
async fn failed_launch_fails_start() {
    let f = fixture();
    f.process.set_behavior(LaunchBehavior::Fail);
    assert!(f.supervisor.start().await.is_err());
    assert!(!f.supervisor.is_running());
}

// ----- orphan recovery -------------------------------------------------------------

#[tokio::test]
async fn start_without_state_file_skips_orphan_cleanup() {
    let f = fixture();
    f.supervisor.start().await.unwrap();

    assert_eq!(f.state_store.delete_count(), 0);
    assert!(f.process.terminations().is_empty());

    f.supervisor.stop().await;
}

#[tokio::test]
async fn stale_state_for_dead_process_is_deleted_without_kill() {
    let store = MockStateStore::with_state(ServerState::new(999_999, 123_456_789));
    let f = fixture_with(SupervisorFlags::default(), Duration::from_secs(3600), store);

    f.supervisor.start().await.unwrap();

    // Record removed, but nothing was terminated: the PID is long gone.
    assert!(f.state_store.delete_count() >= 1);
    assert!(f.process.terminations().is_empty());

    f.supervisor.stop().await;
}

#[tokio::test]
#[cfg(unix)]
async fn live_orphan_with_matching_creation_time_is_killed() {
    let mut orphan = tokio::process::Command::new("sleep")
        .arg("60")
        .spawn()
        .expect("spawn sleep");
    let pid = orphan.id().expect("pid");
    let creation_time = process_creation_time(pid).expect("creation time");

    let store = MockStateStore::with_state(ServerState::new(pid, creation_time));
    let f = fixture_with(SupervisorFlags::default(), Duration::from_secs(3600), store);

    f.supervisor.start().await.unwrap();

    let terminations = f.process.terminations();
    assert_eq!(terminations.len(), 1);
    assert_eq!(terminations[0].0.pid, pid);
    assert!(terminations[0].1, "orphan kill must be forced");
    assert!(f.state_store.delete_count() >= 1);

    f.supervisor.stop().await;
    orphan.kill().await.ok();
    let _ = orphan.wait().await;
}

#[tokio::test]
#[cfg(unix)]
async fn reused_pid_with_different_creation_time_is_left_alone() {
    let mut bystander = tokio::process::Command::new("sleep")
        .arg("60")
        .spawn()
        .expect("spawn sleep");
    let pid = bystander.id().expect("pid");
    let creation_time = process_creation_time(pid).expect("creation time");

    // Same PID, different recorded creation time: PID reuse.
    let store = MockStateStore::with_state(ServerState::new(pid, creation_time + 9999));
    let f = fixture_with(SupervisorFlags::default(), Duration::from_secs(3600), store);

    f.supervisor.start().await.unwrap();

    assert!(f.process.terminations().is_empty());
    assert!(f.state_store.delete_count() >= 1);

    f.supervisor.stop().await;
    bystander.kill().await.ok();
    let _ = bystander.wait().await;
}

// ----- port resolution ---------------------------------------------------------------

#[tokio::test]
async fn colliding_preferred_port_resolves_forward_and_updates_pref() {
    let f = fixture();

    // Occupy a high port and prefer it for MCP.
    let blocker = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let taken = blocker.local_addr().unwrap().port();
    f.prefs.set_int(PREF_MCP_PORT, i64::from(taken));

    f.supervisor.start().await.unwrap();

    let mcp = f.supervisor.mcp_port();
    assert_ne!(mcp, taken);
    assert!(mcp > taken);
    assert_eq!(f.prefs.get_int(PREF_MCP_PORT), Some(i64::from(mcp)));

    f.supervisor.stop().await;
}

// ----- lock ---------------------------------------------------------------------------

#[tokio::test]
#[cfg(unix)]
async fn second_supervisor_cannot_start_while_lock_is_held() {
    let data_dir = tempfile::tempdir().unwrap();
    let layout = boss_core::DataLayout::at(data_dir.path().join(".browseros"));

    let build = || {
        let mut options = SupervisorOptions::new(
            layout.clone(),
            data_dir.path().join("bundle/bin/browseros_server"),
            data_dir.path().join("bundle"),
        );
        options.health_interval = Duration::from_secs(3600);
        Supervisor::new(
            options,
            MockProcessController::new(),
            MockStateStore::new(),
            MockHealthChecker::new(true),
            Arc::new(MemoryPrefStore::new()),
        )
    };

    let first = build();
    let second = build();

    first.start().await.unwrap();
    assert!(second.start().await.is_err());

    first.stop().await;
    second.start().await.unwrap();
    second.stop().await;
}

// ----- health loop wiring ----------------------------------------------------------------

#[tokio::test]
async fn health_loop_probes_resolved_mcp_port() {
    let f = fixture_with(
        SupervisorFlags::default(),
        Duration::from_millis(50),
        MockStateStore::new(),
    );
    f.supervisor.start().await.unwrap();
    let mcp = f.supervisor.mcp_port();

    tokio::time::sleep(Duration::from_millis(300)).await;
    f.supervisor.stop().await;

    let probes = f.health.probes.lock().unwrap().clone();
    assert!(!probes.is_empty(), "health loop should have probed");
    assert!(probes.iter().all(|&p| p == mcp));
}

#[tokio::test]
async fn restart_requested_pref_triggers_restart_and_resets() {
    let f = fixture_with(
        SupervisorFlags::default(),
        Duration::from_millis(50),
        MockStateStore::new(),
    );
    f.supervisor.start().await.unwrap();
    assert_eq!(f.process.launch_count(), 1);

    f.prefs.set_bool(PREF_RESTART_REQUESTED, true);
    tokio::time::sleep(Duration::from_millis(300)).await;
    f.supervisor.stop().await;

    assert_eq!(f.prefs.get_bool(PREF_RESTART_REQUESTED), Some(false));
    assert!(f.process.launch_count() >= 2, "restart should have relaunched");
}
