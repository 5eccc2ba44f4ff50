//! Load Balancing Selector logic

use std::cmp::Ordering;

use crate::domain::node::SharedNode;

/// Selects the node with the lowest load score.
///
/// Ties go to the candidate that comes first, so callers passing registry
/// snapshots get registration order as the tie-breaker.
pub fn select_least_loaded<'a, I>(candidates: I) -> Option<SharedNode>
where
    I: IntoIterator<Item = &'a SharedNode>,
{
    candidates
        .into_iter()
        .min_by(|a, b| {
            let score_a = a.load_score();
            let score_b = b.load_score();
            score_a.partial_cmp(&score_b).unwrap_or(Ordering::Equal)
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::circuit::BreakerPolicy;
    use crate::domain::node::{Node, NodeSpec};
    use crate::load_balancer::ewma::ResponseTimeEwma;
    use std::sync::Arc;

    fn node(id: &str, cpu: f64, mem: f64) -> SharedNode {
        let node = Node::new(
            NodeSpec::new(id, "127.0.0.1", 9000, "svc"),
            BreakerPolicy::default(),
            ResponseTimeEwma::new(0.3, true),
        );
        node.set_load(cpu, mem);
        Arc::new(node)
    }

    #[test]
    fn test_picks_lowest_score() {
        let nodes = vec![node("busy", 90.0, 90.0), node("idle", 10.0, 10.0)];
        let best = select_least_loaded(nodes.iter()).map(|n| n.id.to_string());
        assert_eq!(best.as_deref(), Some("idle"));
    }

    #[test]
    fn test_ties_go_to_first_candidate() {
        let nodes = vec![node("first", 20.0, 20.0), node("second", 20.0, 20.0)];
        let best = select_least_loaded(nodes.iter()).map(|n| n.id.to_string());
        assert_eq!(best.as_deref(), Some("first"));
    }

    #[test]
    fn test_empty_candidates() {
        let nodes: Vec<SharedNode> = Vec::new();
        assert!(select_least_loaded(nodes.iter()).is_none());
    }
}
