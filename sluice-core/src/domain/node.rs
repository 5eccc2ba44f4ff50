//! Backend node records.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::info;

use crate::domain::circuit::{Availability, BreakerPolicy, CircuitBreaker, NodeStatus};
use crate::load_balancer::ewma::ResponseTimeEwma;

/// A unique identifier for a backend node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Wrap an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

fn default_max_connections() -> u32 {
    100
}

/// Registration data for a node, as supplied by whoever owns membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique node identifier.
    pub node_id: NodeId,
    /// Host name or address the node listens on.
    pub host: String,
    /// TCP port the node listens on.
    pub port: u16,
    /// Logical service pool the node belongs to.
    pub service_name: String,
    /// Connection capacity used to normalise the in-flight count.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl NodeSpec {
    /// A spec with the default connection capacity of 100.
    pub fn new(
        node_id: impl Into<NodeId>,
        host: impl Into<String>,
        port: u16,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            host: host.into(),
            port,
            service_name: service_name.into(),
            max_connections: default_max_connections(),
        }
    }

    /// Override the connection capacity.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }
}

/// Read-only view of a node's public metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Node identifier.
    pub node_id: NodeId,
    /// Service pool.
    pub service: String,
    /// Base URL of the node.
    pub url: String,
    /// Circuit-breaker status.
    pub status: NodeStatus,
    /// Current load score (lower is better).
    pub load_score: f64,
    /// Reported CPU usage, 0-100.
    pub cpu_usage: f64,
    /// Reported memory usage, 0-100.
    pub memory_usage: f64,
    /// In-flight requests routed through the balancer.
    pub active_connections: u64,
    /// Connection capacity.
    pub max_connections: u32,
    /// Response-time moving average in milliseconds.
    pub avg_response_time_ms: f64,
    /// Total reported outcomes.
    pub request_count: u64,
    /// Total reported failures.
    pub error_count: u64,
    /// `error_count / request_count`.
    pub error_rate: f64,
    /// Failure streak feeding the circuit breaker.
    pub consecutive_failures: u32,
    /// Adaptive routing weight.
    pub weight: f64,
    /// Whether the node would currently accept traffic.
    pub is_available: bool,
    /// Unix millis of the last active health probe, if any.
    pub last_health_check_ms: Option<u64>,
}

/// Represents a single backend node and all of its mutable state.
///
/// Load gauges, the response-time average and the weight are lock-free.
/// Circuit-breaker state and outcome counters sit behind one mutex.
#[derive(Debug)]
pub struct Node {
    /// The unique ID of the node.
    pub id: NodeId,
    /// Service pool the node belongs to.
    pub service_name: String,
    /// Host the node listens on.
    pub host: String,
    /// Port the node listens on.
    pub port: u16,
    /// Connection capacity, always at least 1.
    pub max_connections: u32,
    cpu_usage: AtomicU64,
    memory_usage: AtomicU64,
    active_connections: AtomicU64,
    weight: AtomicU64,
    last_health_check_ms: AtomicU64,
    response_time: ResponseTimeEwma,
    breaker: Mutex<CircuitBreaker>,
    policy: BreakerPolicy,
}

/// A thread-safe reference to a Node.
pub type SharedNode = Arc<Node>;

fn load_f64(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::Acquire))
}

fn store_f64(cell: &AtomicU64, value: f64) {
    cell.store(value.to_bits(), Ordering::Release);
}

fn percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

pub(crate) fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Node {
    /// Create a healthy, idle node with weight 1.0.
    pub fn new(spec: NodeSpec, policy: BreakerPolicy, response_time: ResponseTimeEwma) -> Self {
        Self {
            id: spec.node_id,
            service_name: spec.service_name,
            host: spec.host,
            port: spec.port,
            max_connections: spec.max_connections.max(1),
            cpu_usage: AtomicU64::new(0f64.to_bits()),
            memory_usage: AtomicU64::new(0f64.to_bits()),
            active_connections: AtomicU64::new(0),
            weight: AtomicU64::new(1f64.to_bits()),
            last_health_check_ms: AtomicU64::new(0),
            response_time,
            breaker: Mutex::new(CircuitBreaker::new()),
            policy,
        }
    }

    /// Base URL callers should send work to.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Reported CPU usage, 0-100.
    pub fn cpu_usage(&self) -> f64 {
        load_f64(&self.cpu_usage)
    }

    /// Reported memory usage, 0-100.
    pub fn memory_usage(&self) -> f64 {
        load_f64(&self.memory_usage)
    }

    /// Store externally reported load. Values are clamped to 0-100.
    pub fn set_load(&self, cpu_usage: f64, memory_usage: f64) {
        store_f64(&self.cpu_usage, percent(cpu_usage));
        store_f64(&self.memory_usage, percent(memory_usage));
    }

    /// In-flight requests.
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Count one more in-flight request.
    pub fn acquire_connection(&self) {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
    }

    /// Count one fewer in-flight request, never going below zero.
    pub fn release_connection(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
    }

    /// Load score in `[0, 1]` for well-formed inputs: lower is better.
    ///
    /// `0.4 * cpu + 0.3 * memory + 0.3 * connection saturation`
    pub fn load_score(&self) -> f64 {
        let cpu = self.cpu_usage() / 100.0;
        let mem = self.memory_usage() / 100.0;
        let conns = self.active_connections() as f64 / self.max_connections as f64;
        0.4 * cpu + 0.3 * mem + 0.3 * conns
    }

    /// Response-time moving average in milliseconds.
    pub fn avg_response_time_ms(&self) -> f64 {
        self.response_time.get()
    }

    /// Adaptive routing weight.
    pub fn weight(&self) -> f64 {
        load_f64(&self.weight)
    }

    /// Add `delta` to the weight, clamping into `[min, max]`. Returns the new weight.
    pub fn adjust_weight(&self, delta: f64, min: f64, max: f64) -> f64 {
        let mut next = 0.0;
        let _ = self
            .weight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                next = (f64::from_bits(bits) + delta).clamp(min, max);
                Some(next.to_bits())
            });
        next
    }

    /// Circuit-breaker status.
    pub fn status(&self) -> NodeStatus {
        self.breaker.lock().status()
    }

    /// Current failure streak.
    pub fn consecutive_failures(&self) -> u32 {
        self.breaker.lock().consecutive_failures()
    }

    /// Total reported outcomes.
    pub fn request_count(&self) -> u64 {
        self.breaker.lock().request_count()
    }

    /// Total reported failures.
    pub fn error_count(&self) -> u64 {
        self.breaker.lock().error_count()
    }

    /// Failure share of all reported outcomes.
    pub fn error_rate(&self) -> f64 {
        self.breaker.lock().error_rate()
    }

    /// Record a successful request and its response time.
    pub fn record_success(&self, response_time_ms: f64) {
        self.breaker.lock().on_success();
        self.response_time.observe(response_time_ms);
    }

    /// Record a failed request. Returns `true` when this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        self.breaker.lock().on_failure(&self.policy, Instant::now())
    }

    /// Availability check, performing the recovery probe when it is due.
    pub fn check_availability(&self) -> Availability {
        let availability = self.breaker.lock().check(&self.policy, Instant::now());
        if availability == Availability::Recovered {
            info!(node_id = %self.id, "circuit_breaker.half_open");
        }
        availability
    }

    /// Whether the node may receive traffic. See [`check_availability`](Self::check_availability).
    pub fn is_available(&self) -> bool {
        self.check_availability().is_available()
    }

    /// Stamp the time of the latest active health probe.
    pub fn mark_probed(&self, at: SystemTime) {
        self.last_health_check_ms
            .store(unix_millis(at), Ordering::Release);
    }

    /// Unix millis of the latest active health probe.
    pub fn last_health_check_ms(&self) -> Option<u64> {
        match self.last_health_check_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Capture the node's public metrics without changing any state.
    pub fn snapshot(&self) -> NodeSnapshot {
        let (status, request_count, error_count, error_rate, consecutive_failures, is_available) = {
            let breaker = self.breaker.lock();
            (
                breaker.status(),
                breaker.request_count(),
                breaker.error_count(),
                breaker.error_rate(),
                breaker.consecutive_failures(),
                breaker.peek(&self.policy, Instant::now()),
            )
        };

        NodeSnapshot {
            node_id: self.id.clone(),
            service: self.service_name.clone(),
            url: self.url(),
            status,
            load_score: self.load_score(),
            cpu_usage: self.cpu_usage(),
            memory_usage: self.memory_usage(),
            active_connections: self.active_connections(),
            max_connections: self.max_connections,
            avg_response_time_ms: self.avg_response_time_ms(),
            request_count,
            error_count,
            error_rate,
            consecutive_failures,
            weight: self.weight(),
            is_available,
            last_health_check_ms: self.last_health_check_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::time::Duration;

    fn node_with(policy: BreakerPolicy) -> Node {
        Node::new(
            NodeSpec::new("n1", "10.0.0.1", 8001, "inference-svc"),
            policy,
            ResponseTimeEwma::new(0.3, true),
        )
    }

    #[test]
    fn test_load_score_weights() {
        let node = Node::new(
            NodeSpec::new("n1", "10.0.0.1", 8001, "inference-svc").with_max_connections(100),
            BreakerPolicy::default(),
            ResponseTimeEwma::new(0.3, true),
        );
        node.set_load(50.0, 20.0);
        for _ in 0..10 {
            node.acquire_connection();
        }
        let expected = 0.4 * 0.5 + 0.3 * 0.2 + 0.3 * 0.1;
        assert!((node.load_score() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_load_is_clamped() {
        let node = node_with(BreakerPolicy::default());
        node.set_load(150.0, f64::NAN);
        assert_eq!(node.cpu_usage(), 100.0);
        assert_eq!(node.memory_usage(), 0.0);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let node = Node::new(
            NodeSpec::new("n1", "h", 1, "svc").with_max_connections(0),
            BreakerPolicy::default(),
            ResponseTimeEwma::new(0.3, true),
        );
        assert_eq!(node.max_connections, 1);
        assert!(node.load_score().is_finite());
    }

    #[test]
    fn test_release_never_goes_negative() {
        let node = node_with(BreakerPolicy::default());
        node.release_connection();
        assert_eq!(node.active_connections(), 0);

        node.acquire_connection();
        node.release_connection();
        node.release_connection();
        assert_eq!(node.active_connections(), 0);
    }

    #[test]
    fn test_weight_clamps() {
        let node = node_with(BreakerPolicy::default());
        assert_eq!(node.adjust_weight(5.0, 0.1, 2.0), 2.0);
        assert_eq!(node.adjust_weight(-10.0, 0.1, 2.0), 0.1);
        assert_eq!(node.weight(), 0.1);
    }

    #[test]
    fn test_snapshot_does_not_recover() {
        let policy = BreakerPolicy {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(10),
        };
        let node = node_with(policy);
        assert!(node.record_failure());
        std::thread::sleep(Duration::from_millis(30));

        let snapshot = node.snapshot();
        assert!(snapshot.is_available);
        assert_eq!(snapshot.status, NodeStatus::CircuitOpen);
        assert_eq!(node.status(), NodeStatus::CircuitOpen);
    }

    #[test]
    fn test_recovery_probe_fires_once_under_contention() {
        let policy = BreakerPolicy {
            failure_threshold: 5,
            recovery_timeout: Duration::from_millis(20),
        };
        let node = Arc::new(node_with(policy));
        for _ in 0..5 {
            node.record_failure();
        }
        assert_eq!(node.status(), NodeStatus::CircuitOpen);
        assert!(!node.is_available());

        std::thread::sleep(Duration::from_millis(50));

        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));
        let recovered = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let node = node.clone();
                let barrier = barrier.clone();
                let recovered = recovered.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let availability = node.check_availability();
                    assert!(availability.is_available());
                    if availability == Availability::Recovered {
                        recovered.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(recovered.load(Ordering::SeqCst), 1);
        assert_eq!(node.status(), NodeStatus::Degraded);
        assert_eq!(node.consecutive_failures(), 0);
        assert_eq!(node.request_count(), 5);
        assert_eq!(node.error_count(), 5);
    }

    #[test]
    fn test_probe_stamp() {
        let node = node_with(BreakerPolicy::default());
        assert_eq!(node.last_health_check_ms(), None);
        node.mark_probed(UNIX_EPOCH + Duration::from_millis(1_234));
        assert_eq!(node.last_health_check_ms(), Some(1_234));
    }
}
