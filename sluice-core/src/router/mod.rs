//! Node registry and request router.
//!
//! [`DistributionSystem`] exclusively owns every [`Node`]. Routing filters the
//! registry down to nodes whose service pool may serve the request type and
//! whose circuit breaker admits traffic, then picks the least loaded one.
//! Recent decisions are cached per `(request type, priority)`.

pub mod cache;

use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{RouterConfig, SluiceConfig};
use crate::domain::circuit::BreakerPolicy;
use crate::domain::node::{Node, NodeId, NodeSnapshot, NodeSpec, SharedNode};
use crate::domain::request::{Priority, RequestType};
use crate::domain::routing::{NodeRegistry, RouteResult};
use crate::error::RouteError;
use crate::load_balancer::ewma::ResponseTimeEwma;
use crate::load_balancer::selector::select_least_loaded;
use self::cache::RouteCache;

/// Owns node records and makes routing decisions.
#[derive(Debug)]
pub struct DistributionSystem {
    registry: NodeRegistry,
    cache: RouteCache,
    config: RouterConfig,
    breaker: BreakerPolicy,
}

/// A shared handle to the router.
pub type SharedDistributionSystem = Arc<DistributionSystem>;

impl DistributionSystem {
    /// An empty router.
    pub fn new(config: RouterConfig, breaker: BreakerPolicy) -> Self {
        Self {
            registry: NodeRegistry::new(),
            cache: RouteCache::new(config.cache_ttl()),
            config,
            breaker,
        }
    }

    /// An empty router built from the routing and breaker sections of `config`.
    ///
    /// Start-up nodes are not registered here; the composition root does that.
    pub fn from_config(config: &SluiceConfig) -> Self {
        Self::new(config.router.clone(), config.breaker.policy())
    }

    /// Register a node, replacing any record with the same id.
    pub fn register_node(&self, spec: NodeSpec) -> SharedNode {
        let node = Arc::new(Node::new(
            spec,
            self.breaker,
            ResponseTimeEwma::new(
                self.config.response_time_alpha,
                self.config.seed_response_time,
            ),
        ));
        let replaced = self.registry.register(node.clone());
        if replaced.is_some() {
            self.cache.invalidate_node(&node.id);
        }

        info!(
            node_id = %node.id,
            service = %node.service_name,
            url = %node.url(),
            replaced = replaced.is_some(),
            "node.registered"
        );
        node
    }

    /// Remove a node. Returns whether it was registered.
    pub fn unregister_node(&self, id: &NodeId) -> bool {
        match self.registry.unregister(id) {
            Some(_) => {
                self.cache.invalidate_node(id);
                info!(node_id = %id, "node.unregistered");
                true
            }
            None => false,
        }
    }

    /// Look a node up by id.
    pub fn node(&self, id: &NodeId) -> Option<SharedNode> {
        self.registry.get(id)
    }

    /// Every registered node, in registration order.
    pub fn nodes(&self) -> Arc<Vec<SharedNode>> {
        self.registry.snapshot()
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.registry.len()
    }

    /// Pick a node for a request.
    ///
    /// A cached route younger than the TTL is reused (with `cached = true`)
    /// while its node is still registered, still in an eligible pool and
    /// available. Otherwise the least
    /// loaded available node of the eligible pools wins; ties go to the node
    /// registered first.
    pub fn route_request(
        &self,
        request_type: RequestType,
        priority: Priority,
    ) -> Result<RouteResult, RouteError> {
        let key = (request_type, priority);
        let now = Instant::now();

        let pools = self.config.pools.pools_for(request_type);

        if let Some(mut hit) = self.cache.get(&key, now) {
            let still_eligible = self
                .registry
                .get(&hit.node_id)
                .map(|node| {
                    // A replacement racing this lookup may have a new pool or address.
                    pools.iter().any(|p| *p == node.service_name)
                        && node.url() == hit.node_url
                        && node.is_available()
                })
                .unwrap_or(false);
            if still_eligible {
                hit.cached = true;
                debug!(
                    node_id = %hit.node_id,
                    request_type = %request_type,
                    priority = %priority,
                    "request.routed_from_cache"
                );
                return Ok(hit);
            }
        }

        if pools.is_empty() {
            warn!(request_type = %request_type, "routing.no_compatible_service");
            return Err(RouteError::NoCompatibleService(request_type));
        }

        let snapshot = self.registry.snapshot();
        let candidates: Vec<SharedNode> = snapshot
            .iter()
            .filter(|node| pools.iter().any(|p| *p == node.service_name))
            .filter(|node| node.is_available())
            .cloned()
            .collect();

        let Some(best) = select_least_loaded(candidates.iter()) else {
            warn!(
                request_type = %request_type,
                compatible_services = ?pools,
                "routing.no_available_nodes"
            );
            return Err(RouteError::NoAvailableNode(request_type));
        };

        let route = RouteResult {
            node_id: best.id.clone(),
            node_url: best.url(),
            request_type,
            priority,
            timeout: self.config.timeouts.timeout_for(priority),
            attempt: 1,
            cached: false,
        };
        self.cache.insert(key, route.clone(), now);

        info!(
            node_id = %best.id,
            request_type = %request_type,
            priority = %priority,
            load_score = best.load_score(),
            "request.routed"
        );
        Ok(route)
    }

    /// Record a successful request.
    ///
    /// Unknown ids are ignored: feedback may race with unregistration.
    pub fn report_success(&self, id: &NodeId, response_time_ms: f64) {
        let Some(node) = self.registry.get(id) else {
            debug!(node_id = %id, "feedback for unknown node ignored");
            return;
        };
        node.record_success(response_time_ms);
    }

    /// Record a failed request, opening the node's circuit at the threshold.
    ///
    /// Unknown ids are ignored: feedback may race with unregistration.
    pub fn report_failure(&self, id: &NodeId) {
        let Some(node) = self.registry.get(id) else {
            debug!(node_id = %id, "feedback for unknown node ignored");
            return;
        };
        if node.record_failure() {
            warn!(
                node_id = %id,
                failures = node.consecutive_failures(),
                "circuit_breaker.opened"
            );
        }
    }

    /// Store externally reported CPU and memory usage. Returns whether the node exists.
    pub fn report_load(&self, id: &NodeId, cpu_usage: f64, memory_usage: f64) -> bool {
        match self.registry.get(id) {
            Some(node) => {
                node.set_load(cpu_usage, memory_usage);
                debug!(node_id = %id, cpu_usage, memory_usage, "node.load_reported");
                true
            }
            None => false,
        }
    }

    /// Record the outcome of an active health probe.
    ///
    /// Every probe stamps `last_health_check`; an unreachable node is also
    /// reported as a failure so a dead node's circuit opens without traffic.
    pub fn record_probe(&self, id: &NodeId, reachable: bool) {
        let Some(node) = self.registry.get(id) else {
            return;
        };
        node.mark_probed(SystemTime::now());
        if !reachable {
            self.report_failure(id);
        }
    }

    /// Read-only snapshot of every node, in registration order.
    pub fn nodes_status(&self) -> Vec<NodeSnapshot> {
        self.registry
            .snapshot()
            .iter()
            .map(|node| node.snapshot())
            .collect()
    }
}
