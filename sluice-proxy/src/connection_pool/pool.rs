//! Lock-free hot pool implementation using DashMap and SegQueue.

use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::client::conn::http1::SendRequest;
use std::sync::Arc;

/// Request sender for one backend HTTP/1.1 connection.
pub type BackendSender = SendRequest<Full<Bytes>>;

/// A lock-free pool of idle backend connections, keyed by `host:port`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPool {
    idle_connections: Arc<DashMap<String, Arc<SegQueue<BackendSender>>>>,
}

impl ConnectionPool {
    /// Creates a new empty connection pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pops an idle sender for `authority`, discarding closed ones.
    ///
    /// The caller still has to await `ready()` before use.
    pub fn try_pop(&self, authority: &str) -> Option<BackendSender> {
        let queue = self.idle_connections.get(authority)?.value().clone();
        while let Some(sender) = queue.pop() {
            if !sender.is_closed() {
                return Some(sender);
            }
        }
        None
    }

    /// Returns a sender to the pool for reuse. Closed senders are dropped.
    pub fn push(&self, authority: &str, sender: BackendSender) {
        if sender.is_closed() {
            return;
        }

        let queue = self
            .idle_connections
            .entry(authority.to_string())
            .or_insert_with(|| Arc::new(SegQueue::new()))
            .value()
            .clone();

        queue.push(sender);
    }

    /// Number of idle senders parked for `authority`.
    pub fn idle_count(&self, authority: &str) -> usize {
        self.idle_connections
            .get(authority)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }
}
