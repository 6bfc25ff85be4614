//! Shared test doubles for supervisor and updater integration tests.
#![allow(dead_code)] // not every test file uses every helper

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use boss_core::{
    HealthChecker, LaunchResult, MetricsSink, ProcessController, ProcessHandle, RestartSink,
    ServerLaunchConfig, ServerState, ServerUpdater, StateStore,
};
use serde_json::Value;

// ----- process controller ---------------------------------------------------

#[derive(Debug, Clone)]
pub enum LaunchBehavior {
    /// Launch succeeds on the primary binary.
    Succeed,
    /// Launch succeeds but reports the fallback binary was used.
    Fallback,
    /// Both attempts fail.
    Fail,
}

/// Recording `ProcessController`; PIDs count up from 1000.
pub struct MockProcessController {
    pub behavior: Mutex<LaunchBehavior>,
    pub launch_delay: Mutex<Duration>,
    pub launches: Mutex<Vec<ServerLaunchConfig>>,
    pub terminations: Mutex<Vec<(ProcessHandle, bool)>>,
    next_pid: AtomicU32,
}

impl MockProcessController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(LaunchBehavior::Succeed),
            launch_delay: Mutex::new(Duration::ZERO),
            launches: Mutex::new(Vec::new()),
            terminations: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(1000),
        })
    }

    pub fn set_behavior(&self, behavior: LaunchBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        *self.launch_delay.lock().unwrap() = delay;
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn last_launch(&self) -> Option<ServerLaunchConfig> {
        self.launches.lock().unwrap().last().cloned()
    }

    pub fn terminations(&self) -> Vec<(ProcessHandle, bool)> {
        self.terminations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessController for MockProcessController {
    async fn launch(&self, config: &ServerLaunchConfig) -> LaunchResult {
        let delay = *self.launch_delay.lock().unwrap();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        self.launches.lock().unwrap().push(config.clone());
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            LaunchBehavior::Succeed | LaunchBehavior::Fallback => {
                let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
                LaunchResult {
                    process: Some(ProcessHandle::new(pid, u64::from(pid) * 7)),
                    used_fallback: matches!(behavior, LaunchBehavior::Fallback),
                }
            }
            LaunchBehavior::Fail => LaunchResult {
                process: None,
                used_fallback: false,
            },
        }
    }

    async fn terminate(&self, process: &ProcessHandle, force: bool) {
        self.terminations.lock().unwrap().push((*process, force));
    }
}

// ----- health checker -------------------------------------------------------

/// Health checker returning scripted results, then a steady default.
pub struct MockHealthChecker {
    script: Mutex<Vec<bool>>,
    default: AtomicBool,
    pub probes: Mutex<Vec<u16>>,
}

impl MockHealthChecker {
    pub fn new(default: bool) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Vec::new()),
            default: AtomicBool::new(default),
            probes: Mutex::new(Vec::new()),
        })
    }

    pub fn push_results(&self, results: &[bool]) {
        self.script.lock().unwrap().extend_from_slice(results);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.lock().unwrap().len()
    }
}

#[async_trait]
impl HealthChecker for MockHealthChecker {
    async fn check_health(&self, port: u16) -> bool {
        self.probes.lock().unwrap().push(port);
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            self.default.load(Ordering::SeqCst)
        } else {
            script.remove(0)
        }
    }
}

// ----- state store ----------------------------------------------------------

/// In-memory state store with call counts.
#[derive(Default)]
pub struct MockStateStore {
    pub state: Mutex<Option<ServerState>>,
    pub writes: AtomicU32,
    pub deletes: AtomicU32,
}

impl MockStateStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_state(state: ServerState) -> Arc<Self> {
        let store = Self::default();
        *store.state.lock().unwrap() = Some(state);
        Arc::new(store)
    }

    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl StateStore for MockStateStore {
    fn read(&self) -> Option<ServerState> {
        *self.state.lock().unwrap()
    }

    fn write(&self, state: &ServerState) -> bool {
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = Some(*state);
        true
    }

    fn delete(&self) -> bool {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = None;
        true
    }
}

// ----- updater ---------------------------------------------------------------

/// Updater stub with fixed paths and call counters.
pub struct MockUpdater {
    pub binary_path: PathBuf,
    pub resources_path: PathBuf,
    pub starts: AtomicU32,
    pub stops: AtomicU32,
    pub invalidations: AtomicU32,
}

impl MockUpdater {
    pub fn new(binary_path: PathBuf, resources_path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            binary_path,
            resources_path,
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            invalidations: AtomicU32::new(0),
        })
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn invalidation_count(&self) -> u32 {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerUpdater for MockUpdater {
    async fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_update_in_progress(&self) -> bool {
        false
    }

    async fn check_now(&self) {}

    fn best_server_binary_path(&self) -> PathBuf {
        self.binary_path.clone()
    }

    fn best_server_resources_path(&self) -> PathBuf {
        self.resources_path.clone()
    }

    async fn invalidate_downloaded_version(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

// ----- metrics ----------------------------------------------------------------

/// Metrics sink recording every event.
#[derive(Default)]
pub struct RecordingMetrics {
    pub events: Mutex<Vec<(String, Value)>>,
}

impl RecordingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events_named(&self, name: &str) -> Vec<Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(event, _)| event == name)
            .map(|(_, props)| props.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

impl MetricsSink for RecordingMetrics {
    fn log(&self, event: &str, props: Value) {
        self.events.lock().unwrap().push((event.to_string(), props));
    }
}

// ----- restart sink -----------------------------------------------------------

/// Restart sink standing in for the supervisor in updater tests.
pub struct MockRestartHost {
    pub restart_result: AtomicBool,
    pub restarts: AtomicU32,
    pub mcp_port: Mutex<u16>,
}

impl MockRestartHost {
    pub fn new(restart_result: bool) -> Arc<Self> {
        Arc::new(Self {
            restart_result: AtomicBool::new(restart_result),
            restarts: AtomicU32::new(0),
            mcp_port: Mutex::new(0),
        })
    }

    pub fn restart_count(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn set_mcp_port(&self, port: u16) {
        *self.mcp_port.lock().unwrap() = port;
    }
}

#[async_trait]
impl RestartSink for MockRestartHost {
    async fn request_restart(&self) -> bool {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.restart_result.load(Ordering::SeqCst)
    }

    fn mcp_port(&self) -> u16 {
        *self.mcp_port.lock().unwrap()
    }
}

// ----- async polling ----------------------------------------------------------

/// Poll `cond` until it holds, panicking after ~5 seconds. For work that
/// finishes on a background task (the updater's first check, the health
/// loop).
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..250 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {what}");
}

// ----- loopback HTTP server -----------------------------------------------------

/// Minimal HTTP/1.1 server for updater tests: serves fixed bodies by path,
/// one connection at a time, until dropped.
///
/// Bodies may contain the literal `{{PORT}}`, replaced with the bound port
/// after binding, so an appcast body can reference its own package URL.
pub struct TestHttpServer {
    pub port: u16,
    shutdown: Arc<AtomicBool>,
}

impl TestHttpServer {
    pub fn serve(routes: HashMap<String, Vec<u8>>) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind test server");
        let port = listener.local_addr().unwrap().port();
        listener.set_nonblocking(true).expect("nonblocking");

        let routes: HashMap<String, Vec<u8>> = routes
            .into_iter()
            .map(|(path, body)| {
                let text = String::from_utf8_lossy(&body).into_owned();
                if text.contains("{{PORT}}") {
                    (path, text.replace("{{PORT}}", &port.to_string()).into_bytes())
                } else {
                    (path, body)
                }
            })
            .collect();
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();

        std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        let mut buf = vec![0u8; 4096];
                        let n = stream.read(&mut buf).unwrap_or(0);
                        let request = String::from_utf8_lossy(&buf[..n]).into_owned();
                        let path = request
                            .split_whitespace()
                            .nth(1)
                            .unwrap_or("/")
                            .to_string();

                        let response = match routes.get(&path) {
                            Some(body) => {
                                let mut response = format!(
                                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                                    body.len()
                                )
                                .into_bytes();
                                response.extend_from_slice(body);
                                response
                            }
                            None => b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                                .to_vec(),
                        };
                        let _ = stream.write_all(&response);
                    }
                    Err(_) => std::thread::sleep(Duration::from_millis(10)),
                }
            }
        });

        Self { port, shutdown }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
