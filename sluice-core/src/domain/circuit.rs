//! Per-node circuit breaker.
//!
//! The breaker lives inside a [`Node`](crate::domain::node::Node) behind the
//! node's mutex. Every transition, including the recovery probe performed by
//! [`CircuitBreaker::check`], happens while that mutex is held, so a node
//! leaves `CircuitOpen` at most once per recovery window no matter how many
//! callers race on it.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Health status of a node as tracked by its circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Normal operation.
    Healthy,
    /// Back from an open circuit; the next success restores `Healthy`.
    Degraded,
    /// Reserved. No transition assigns it.
    Unhealthy,
    /// Too many consecutive failures. Traffic is withheld until the recovery timeout passes.
    CircuitOpen,
}

impl NodeStatus {
    /// Upper-case label used in logs and status payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Healthy => "HEALTHY",
            NodeStatus::Degraded => "DEGRADED",
            NodeStatus::Unhealthy => "UNHEALTHY",
            NodeStatus::CircuitOpen => "CIRCUIT_OPEN",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an availability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// The node accepts traffic.
    Available,
    /// The recovery timeout had elapsed and this very check moved the node to `Degraded`.
    Recovered,
    /// The circuit is open (or the node is otherwise excluded).
    Unavailable,
}

impl Availability {
    /// Whether traffic may be sent to the node.
    pub fn is_available(self) -> bool {
        !matches!(self, Availability::Unavailable)
    }
}

/// Thresholds that drive the breaker's transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before the next availability check lets a probe through.
    pub recovery_timeout: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Breaker state plus the outcome counters that move with it.
///
/// `request_count` and `error_count` live here rather than in separate
/// atomics so that `error_count <= request_count` holds for every reader.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    status: NodeStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    request_count: u64,
    error_count: u64,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    /// A closed breaker with zeroed counters.
    pub fn new() -> Self {
        Self {
            status: NodeStatus::Healthy,
            consecutive_failures: 0,
            opened_at: None,
            request_count: 0,
            error_count: 0,
        }
    }

    /// Current status.
    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// Failures observed since the last success or recovery.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// When the circuit last opened. `None` unless the status is `CircuitOpen`.
    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Total reported outcomes.
    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Total reported failures.
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Share of reported outcomes that failed, `0.0` before any report.
    pub fn error_rate(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.request_count as f64
    }

    /// Record a successful request.
    pub fn on_success(&mut self) {
        self.request_count += 1;
        self.consecutive_failures = 0;
        if self.status == NodeStatus::Degraded {
            self.status = NodeStatus::Healthy;
        }
    }

    /// Record a failed request.
    ///
    /// Returns `true` when this failure moved the breaker into `CircuitOpen`.
    /// Failures reported while already open refresh the open timestamp.
    pub fn on_failure(&mut self, policy: &BreakerPolicy, now: Instant) -> bool {
        self.request_count += 1;
        self.error_count += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.consecutive_failures < policy.failure_threshold {
            return false;
        }

        let was_open = self.status == NodeStatus::CircuitOpen;
        self.status = NodeStatus::CircuitOpen;
        self.opened_at = Some(now);
        !was_open
    }

    /// Availability check with the recovery probe folded in.
    ///
    /// An open circuit whose recovery timeout has strictly elapsed moves to
    /// `Degraded` with its failure streak reset, and the caller that performed
    /// the move gets [`Availability::Recovered`].
    pub fn check(&mut self, policy: &BreakerPolicy, now: Instant) -> Availability {
        match self.status {
            NodeStatus::Healthy | NodeStatus::Degraded => Availability::Available,
            NodeStatus::Unhealthy => Availability::Unavailable,
            NodeStatus::CircuitOpen => {
                if !self.recovery_due(policy, now) {
                    return Availability::Unavailable;
                }
                self.status = NodeStatus::Degraded;
                self.consecutive_failures = 0;
                self.opened_at = None;
                Availability::Recovered
            }
        }
    }

    /// Same answer as [`check`](Self::check) without performing any transition.
    pub fn peek(&self, policy: &BreakerPolicy, now: Instant) -> bool {
        match self.status {
            NodeStatus::Healthy | NodeStatus::Degraded => true,
            NodeStatus::Unhealthy => false,
            NodeStatus::CircuitOpen => self.recovery_due(policy, now),
        }
    }

    fn recovery_due(&self, policy: &BreakerPolicy, now: Instant) -> bool {
        match self.opened_at {
            Some(opened) => now.saturating_duration_since(opened) > policy.recovery_timeout,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(breaker: &mut CircuitBreaker, policy: &BreakerPolicy, now: Instant) {
        for _ in 0..policy.failure_threshold {
            breaker.on_failure(policy, now);
        }
    }

    #[test]
    fn test_opens_exactly_at_threshold() {
        let policy = BreakerPolicy::default();
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new();

        for _ in 0..4 {
            assert!(!breaker.on_failure(&policy, now));
        }
        assert_eq!(breaker.status(), NodeStatus::Healthy);

        assert!(breaker.on_failure(&policy, now));
        assert_eq!(breaker.status(), NodeStatus::CircuitOpen);
        assert_eq!(breaker.opened_at(), Some(now));
        assert_eq!(breaker.check(&policy, now), Availability::Unavailable);
    }

    #[test]
    fn test_success_resets_streak() {
        let policy = BreakerPolicy::default();
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new();

        for _ in 0..4 {
            breaker.on_failure(&policy, now);
        }
        breaker.on_success();
        assert_eq!(breaker.consecutive_failures(), 0);

        for _ in 0..4 {
            breaker.on_failure(&policy, now);
        }
        assert_eq!(breaker.status(), NodeStatus::Healthy);
        assert_eq!(breaker.request_count(), 9);
        assert_eq!(breaker.error_count(), 8);
    }

    #[test]
    fn test_recovery_needs_strictly_more_than_timeout() {
        let policy = BreakerPolicy::default();
        let opened = Instant::now();
        let mut breaker = CircuitBreaker::new();
        open(&mut breaker, &policy, opened);

        let at_timeout = opened + policy.recovery_timeout;
        assert_eq!(breaker.check(&policy, at_timeout), Availability::Unavailable);

        let after = at_timeout + Duration::from_millis(1);
        assert!(breaker.peek(&policy, after));
        assert_eq!(breaker.status(), NodeStatus::CircuitOpen);

        assert_eq!(breaker.check(&policy, after), Availability::Recovered);
        assert_eq!(breaker.status(), NodeStatus::Degraded);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert_eq!(breaker.opened_at(), None);

        // Only the first check performs the transition.
        assert_eq!(breaker.check(&policy, after), Availability::Available);
    }

    #[test]
    fn test_degraded_heals_on_success() {
        let policy = BreakerPolicy::default();
        let opened = Instant::now();
        let mut breaker = CircuitBreaker::new();
        open(&mut breaker, &policy, opened);
        breaker.check(&policy, opened + Duration::from_secs(61));

        breaker.on_success();
        assert_eq!(breaker.status(), NodeStatus::Healthy);
    }

    #[test]
    fn test_failure_while_open_refreshes_timestamp() {
        let policy = BreakerPolicy::default();
        let opened = Instant::now();
        let mut breaker = CircuitBreaker::new();
        open(&mut breaker, &policy, opened);

        let later = opened + Duration::from_secs(30);
        assert!(!breaker.on_failure(&policy, later));
        assert_eq!(breaker.opened_at(), Some(later));
        assert_eq!(
            breaker.check(&policy, opened + Duration::from_secs(61)),
            Availability::Unavailable
        );
    }

    #[test]
    fn test_error_rate() {
        let policy = BreakerPolicy::default();
        let mut breaker = CircuitBreaker::new();
        assert_eq!(breaker.error_rate(), 0.0);

        breaker.on_success();
        breaker.on_failure(&policy, Instant::now());
        assert!((breaker.error_rate() - 0.5).abs() < f64::EPSILON);
    }
}
