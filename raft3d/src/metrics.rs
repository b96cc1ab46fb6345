//! Process-wide counters and gauges, exported in Prometheus text format.
//!
//! The handle is cheap to clone; all clones share the same registry.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    snapshots_total: AtomicU64,
    // (method, endpoint) -> count
    requests_total: Mutex<BTreeMap<(String, String), u64>>,
    leadership: Mutex<BTreeMap<String, LeadershipGauges>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct LeadershipGauges {
    is_leader: bool,
    term: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_snapshots(&self) {
        self.inner.snapshots_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshots_total(&self) -> u64 {
        self.inner.snapshots_total.load(Ordering::Relaxed)
    }

    pub fn inc_requests(&self, method: &str, endpoint: &str) {
        *lock(&self.inner.requests_total)
            .entry((method.to_string(), endpoint.to_string()))
            .or_default() += 1;
    }

    pub fn requests_total(&self, method: &str, endpoint: &str) -> u64 {
        lock(&self.inner.requests_total)
            .get(&(method.to_string(), endpoint.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_leader(&self, node_id: &str, is_leader: bool) {
        lock(&self.inner.leadership)
            .entry(node_id.to_string())
            .or_default()
            .is_leader = is_leader;
    }

    pub fn set_term(&self, node_id: &str, term: u64) {
        lock(&self.inner.leadership)
            .entry(node_id.to_string())
            .or_default()
            .term = term;
    }

    /// Current value of the is-leader gauge, `None` if never set for this node.
    pub fn is_leader(&self, node_id: &str) -> Option<bool> {
        lock(&self.inner.leadership)
            .get(node_id)
            .map(|gauges| gauges.is_leader)
    }

    pub fn to_prometheus_text(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP raft3d_requests_total Total HTTP requests\n");
        output.push_str("# TYPE raft3d_requests_total counter\n");
        for ((method, endpoint), count) in lock(&self.inner.requests_total).iter() {
            let _ = writeln!(
                output,
                "raft3d_requests_total{{method=\"{method}\",endpoint=\"{endpoint}\"}} {count}"
            );
        }

        output.push_str("# HELP raft3d_snapshots_total Total snapshots taken\n");
        output.push_str("# TYPE raft3d_snapshots_total counter\n");
        let _ = writeln!(output, "raft3d_snapshots_total {}", self.snapshots_total());

        let leadership = lock(&self.inner.leadership);
        output.push_str("# HELP raft3d_is_leader Whether the node is the leader\n");
        output.push_str("# TYPE raft3d_is_leader gauge\n");
        for (node_id, gauges) in leadership.iter() {
            let _ = writeln!(
                output,
                "raft3d_is_leader{{node_id=\"{node_id}\"}} {}",
                u8::from(gauges.is_leader)
            );
        }
        output.push_str("# HELP raft3d_leader_term Leadership claims made by the node\n");
        output.push_str("# TYPE raft3d_leader_term gauge\n");
        for (node_id, gauges) in leadership.iter() {
            let _ = writeln!(
                output,
                "raft3d_leader_term{{node_id=\"{node_id}\"}} {}",
                gauges.term
            );
        }

        output
    }
}
