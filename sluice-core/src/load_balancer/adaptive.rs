//! Adaptive load balancer.
//!
//! Wraps the router with in-flight accounting, turns request outcomes into
//! weight adjustments, keeps a bounded outcome history and drives the
//! retry-with-backoff loop around caller-supplied operations.

use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{BalancerConfig, SluiceConfig};
use crate::domain::node::{unix_millis, NodeId, NodeSnapshot};
use crate::domain::request::{Priority, RequestType};
use crate::domain::routing::RouteResult;
use crate::error::{ExecuteError, RouteError};
use crate::load_balancer::feedback::{FeedbackLog, FeedbackRecord};
use crate::load_balancer::retry::RetryPolicy;
use crate::router::SharedDistributionSystem;

/// Balancer statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalancerStats {
    /// Outcomes in the retained history.
    pub total_requests: usize,
    /// Share of retained outcomes that succeeded.
    pub success_rate: f64,
    /// Mean response time over the retained history.
    pub avg_response_time_ms: f64,
    /// Router snapshot of every node.
    pub nodes: Vec<NodeSnapshot>,
}

/// Load balancer that learns from request outcomes.
///
/// Holds node ids only; every node record stays owned by the router.
#[derive(Debug)]
pub struct AdaptiveLoadBalancer {
    router: SharedDistributionSystem,
    feedback: FeedbackLog,
    tuning: BalancerConfig,
    retry: RetryPolicy,
}

impl AdaptiveLoadBalancer {
    /// Wrap `router` with the given tuning and retry policy.
    pub fn new(router: SharedDistributionSystem, tuning: BalancerConfig, retry: RetryPolicy) -> Self {
        Self {
            feedback: FeedbackLog::new(tuning.feedback_capacity, tuning.feedback_retain),
            router,
            tuning,
            retry,
        }
    }

    /// Wrap `router` using the balancer and retry sections of `config`.
    pub fn from_config(router: SharedDistributionSystem, config: &SluiceConfig) -> Self {
        Self::new(router, config.balancer, config.retry.policy())
    }

    /// The wrapped router.
    pub fn router(&self) -> &SharedDistributionSystem {
        &self.router
    }

    /// The outcome history.
    pub fn feedback(&self) -> &FeedbackLog {
        &self.feedback
    }

    /// Route a request and count it as in flight on the chosen node.
    pub fn select_node(
        &self,
        request_type: RequestType,
        priority: Priority,
    ) -> Result<RouteResult, RouteError> {
        let route = self.router.route_request(request_type, priority)?;
        if let Some(node) = self.router.node(&route.node_id) {
            node.acquire_connection();
        }
        Ok(route)
    }

    /// Mark one in-flight request on `id` as finished. Unknown ids are ignored.
    pub fn release_node(&self, id: &NodeId) {
        if let Some(node) = self.router.node(id) {
            node.release_connection();
        }
    }

    /// Report an outcome, release the connection, adapt the node's weight and
    /// append the outcome to the history.
    pub fn record_feedback(
        &self,
        id: &NodeId,
        success: bool,
        response_time_ms: f64,
        request_type: RequestType,
    ) {
        if success {
            self.router.report_success(id, response_time_ms);
        } else {
            self.router.report_failure(id);
        }

        self.release_node(id);

        if let Some(node) = self.router.node(id) {
            let t = &self.tuning;
            let delta = if success {
                let perf_factor = (1.0 - response_time_ms / t.slow_response_ms).max(t.min_perf_factor);
                t.learning_rate * perf_factor
            } else {
                -t.learning_rate * t.failure_penalty
            };
            let weight = node.adjust_weight(delta, t.min_weight, t.max_weight);
            debug!(node_id = %id, success, weight, "node.weight_adjusted");
        }

        self.feedback.push(FeedbackRecord {
            node_id: id.clone(),
            success,
            response_time_ms,
            request_type,
            timestamp_ms: unix_millis(std::time::SystemTime::now()),
        });
    }

    /// Run `operation` against a routed node, retrying failures with
    /// exponential backoff.
    ///
    /// `operation` receives the node's base URL and the attempt's timeout
    /// budget, and must enforce that budget itself. Each retry re-runs node
    /// selection, so it may land elsewhere. Routing errors abort at once.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        request_type: RequestType,
        priority: Priority,
        operation: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnMut(String, Duration) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run(request_type, priority, None, operation).await
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), bounded by an
    /// overall deadline.
    ///
    /// Each attempt's budget is capped at the time left, and the loop stops
    /// with [`ExecuteError::DeadlineExceeded`] rather than sleep past the deadline.
    pub async fn execute_with_deadline<F, Fut, T, E>(
        &self,
        request_type: RequestType,
        priority: Priority,
        deadline: Instant,
        operation: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnMut(String, Duration) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run(request_type, priority, Some(deadline), operation)
            .await
    }

    async fn run<F, Fut, T, E>(
        &self,
        request_type: RequestType,
        priority: Priority,
        deadline: Option<Instant>,
        mut operation: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnMut(String, Duration) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error: Option<E> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let mut route = self.select_node(request_type, priority).map_err(|err| {
                warn!(
                    request_type = %request_type,
                    attempt,
                    error = %err,
                    "request.unroutable"
                );
                err
            })?;
            route.attempt = attempt;

            let mut budget = route.timeout;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    self.release_node(&route.node_id);
                    return Err(ExecuteError::DeadlineExceeded {
                        attempts: attempt - 1,
                        last_error,
                    });
                }
                budget = budget.min(remaining);
            }

            let started = Instant::now();
            let outcome = operation(route.node_url.clone(), budget).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;

            let err = match outcome {
                Ok(value) => {
                    self.record_feedback(&route.node_id, true, elapsed_ms, request_type);
                    if attempt > 1 {
                        debug!(attempt, node_id = %route.node_id, "request.succeeded_after_retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            self.record_feedback(&route.node_id, false, elapsed_ms, request_type);

            if attempt >= max_attempts {
                warn!(
                    request_type = %request_type,
                    attempts = attempt,
                    error = %err,
                    "request.retries_exhausted"
                );
                return Err(ExecuteError::AllRetriesExhausted {
                    attempts: attempt,
                    last_error: err,
                });
            }

            let delay = self.retry.delay_for(attempt);
            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    warn!(attempt, error = %err, "request.deadline_exceeded");
                    return Err(ExecuteError::DeadlineExceeded {
                        attempts: attempt,
                        last_error: Some(err),
                    });
                }
            }

            warn!(
                attempt,
                node_id = %route.node_id,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "request.retry"
            );
            last_error = Some(err);
            tokio::time::sleep(delay).await;
        }
    }

    /// Success rate and response time over the retained history, plus the node snapshot.
    pub fn stats(&self) -> BalancerStats {
        let summary = self.feedback.summary();
        BalancerStats {
            total_requests: summary.total,
            success_rate: summary.successes as f64 / summary.total.max(1) as f64,
            avg_response_time_ms: summary.avg_response_time_ms,
            nodes: self.router.nodes_status(),
        }
    }
}
