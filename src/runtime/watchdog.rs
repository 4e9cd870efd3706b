//! Blocked-operation watchdog
//!
//! Detects pipeline stalls without instrumenting the hot path with locks:
//! each port stores the start timestamp of its current blocking operation
//! in an atomic, and a monitor thread scans the registered ports once a
//! second, warning when one has been stuck past the threshold.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

const BLOCK_THRESHOLD: Duration = Duration::from_secs(5);
const SCAN_INTERVAL: Duration = Duration::from_secs(1);

#[inline(always)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Per-port tracking state. `op_start` is 0 while idle.
struct OpState {
    op_start: AtomicU64,
    warned: AtomicBool,
    node_name: String,
    port_name: String,
    operation: String,
}

/// Handle held by a sender/receiver to report its blocking operations.
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<OpState>,
}

impl WatchdogHandle {
    #[inline(always)]
    pub fn start_operation(&self) {
        self.state.op_start.store(now_millis(), Ordering::Relaxed);
        self.state.warned.store(false, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn finish_operation(&self) {
        if self.state.warned.load(Ordering::Relaxed) {
            info!(
                "unblocked: [{}] {} on port '{}'",
                self.state.node_name, self.state.operation, self.state.port_name
            );
            self.state.warned.store(false, Ordering::Relaxed);
        }
        self.state.op_start.store(0, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct Watchdog {
    ports: Arc<Mutex<Vec<Weak<OpState>>>>,
    enabled: Arc<AtomicBool>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            ports: Arc::new(Mutex::new(Vec::new())),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Register a port for monitoring. The returned handle keeps the state
    /// alive; dead ports are dropped from the scan list automatically.
    pub fn register_port(&self, node_name: &str, operation: &str, port_name: &str) -> WatchdogHandle {
        let state = Arc::new(OpState {
            op_start: AtomicU64::new(0),
            warned: AtomicBool::new(false),
            node_name: node_name.to_string(),
            port_name: port_name.to_string(),
            operation: operation.to_string(),
        });
        self.ports.lock().unwrap().push(Arc::downgrade(&state));
        WatchdogHandle { state }
    }

    /// One scan pass over all live ports.
    pub fn check_for_blocked(&self) {
        let now = now_millis();
        let threshold = BLOCK_THRESHOLD.as_millis() as u64;

        self.ports.lock().unwrap().retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let start = state.op_start.load(Ordering::Relaxed);
            if start > 0 {
                let stuck_ms = now.saturating_sub(start);
                if stuck_ms > threshold && !state.warned.swap(true, Ordering::Relaxed) {
                    warn!(
                        "blocked: [{}] {} on port '{}' for {:.1}s",
                        state.node_name,
                        state.operation,
                        state.port_name,
                        stuck_ms as f64 / 1000.0
                    );
                }
            }
            true
        });
    }

    pub fn start_monitoring_thread(&self) -> std::thread::JoinHandle<()> {
        let watchdog = self.clone();
        std::thread::spawn(move || {
            while watchdog.enabled.load(Ordering::Relaxed) {
                std::thread::sleep(SCAN_INTERVAL);
                watchdog.check_for_blocked();
            }
        })
    }

    pub fn stop(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard marking one blocking channel operation.
pub struct OperationGuard<'a> {
    handle: &'a WatchdogHandle,
}

impl<'a> OperationGuard<'a> {
    #[inline(always)]
    pub fn new(handle: &'a WatchdogHandle) -> Self {
        handle.start_operation();
        Self { handle }
    }
}

impl Drop for OperationGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.finish_operation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_clears_op_timestamp() {
        let wd = Watchdog::new();
        let handle = wd.register_port("node", "recv", "in");
        {
            let _guard = OperationGuard::new(&handle);
            assert!(handle.state.op_start.load(Ordering::Relaxed) > 0);
        }
        assert_eq!(handle.state.op_start.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_dead_ports_pruned_on_scan() {
        let wd = Watchdog::new();
        let handle = wd.register_port("node", "send", "out");
        assert_eq!(wd.ports.lock().unwrap().len(), 1);
        drop(handle);
        wd.check_for_blocked();
        assert!(wd.ports.lock().unwrap().is_empty());
    }
}
