//! Node registry and the routing decisions made over it.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::node::{NodeId, SharedNode};
use crate::domain::request::{Priority, RequestType};

/// A lock-free registry of every known node.
///
/// Readers take an `ArcSwap` snapshot; membership changes build a new vector
/// and swap it in with `rcu`. Registration order is preserved, which is what
/// breaks ties between equally loaded nodes.
#[derive(Debug)]
pub struct NodeRegistry {
    nodes: ArcSwap<Vec<SharedNode>>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            nodes: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Insert a node, replacing (in place) any record with the same id.
    ///
    /// Returns the replaced record.
    pub fn register(&self, node: SharedNode) -> Option<SharedNode> {
        let previous = self.nodes.rcu(|current| {
            let mut next = Vec::clone(current);
            match next.iter_mut().find(|n| n.id == node.id) {
                Some(slot) => *slot = node.clone(),
                None => next.push(node.clone()),
            }
            Arc::new(next)
        });
        previous.iter().find(|n| n.id == node.id).cloned()
    }

    /// Remove a node. Returns the removed record, if it was registered.
    pub fn unregister(&self, id: &NodeId) -> Option<SharedNode> {
        let previous = self.nodes.rcu(|current| {
            Arc::new(
                current
                    .iter()
                    .filter(|n| &n.id != id)
                    .cloned()
                    .collect::<Vec<_>>(),
            )
        });
        previous.iter().find(|n| &n.id == id).cloned()
    }

    /// Look a node up by id.
    pub fn get(&self, id: &NodeId) -> Option<SharedNode> {
        self.nodes.load().iter().find(|n| &n.id == id).cloned()
    }

    /// Retrieve a snapshot of all current nodes, in registration order.
    pub fn snapshot(&self) -> Arc<Vec<SharedNode>> {
        self.nodes.load_full()
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.load().len()
    }

    /// Whether no node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.load().is_empty()
    }
}

/// Where a request should go and how long it may take.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteResult {
    /// Chosen node.
    pub node_id: NodeId,
    /// Base URL of the chosen node.
    pub node_url: String,
    /// Request type that was routed.
    pub request_type: RequestType,
    /// Priority class that was routed.
    pub priority: Priority,
    /// Timeout budget for the attempt.
    #[serde(rename = "timeout_ms", serialize_with = "as_millis")]
    pub timeout: Duration,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Set only when the result came from the route cache.
    pub cached: bool,
}

fn as_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}
