//! Short-lived cache of routing decisions keyed by `(request type, priority)`.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::node::NodeId;
use crate::domain::request::{Priority, RequestType};
use crate::domain::routing::RouteResult;

/// Cache key.
pub type RouteKey = (RequestType, Priority);

#[derive(Debug, Clone)]
struct CachedRoute {
    route: RouteResult,
    created_at: Instant,
}

/// Sharded map of recent routes with a fixed time-to-live.
#[derive(Debug)]
pub struct RouteCache {
    entries: DashMap<RouteKey, CachedRoute>,
    ttl: Duration,
}

impl RouteCache {
    /// An empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// The cached route for `key`, if it is younger than the TTL.
    ///
    /// Expired entries are evicted on the way out.
    pub fn get(&self, key: &RouteKey, now: Instant) -> Option<RouteResult> {
        let expired = match self.entries.get(key) {
            Some(entry) if self.is_live(&entry, now) => return Some(entry.route.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries
                .remove_if(key, |_, entry| !self.is_live(entry, now));
        }
        None
    }

    /// Remember `route` for `key`, replacing any previous entry.
    pub fn insert(&self, key: RouteKey, route: RouteResult, now: Instant) {
        self.entries.insert(
            key,
            CachedRoute {
                route,
                created_at: now,
            },
        );
    }

    /// Drop every entry that points at `node_id`.
    pub fn invalidate_node(&self, node_id: &NodeId) {
        self.entries.retain(|_, entry| &entry.route.node_id != node_id);
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_live(&self, entry: &CachedRoute, now: Instant) -> bool {
        now.saturating_duration_since(entry.created_at) < self.ttl
    }
}
