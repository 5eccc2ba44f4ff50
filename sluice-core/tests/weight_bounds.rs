//! Property tests for feedback-driven node weights.

use std::sync::Arc;

use proptest::prelude::*;
use sluice_core::config::{BalancerConfig, RouterConfig};
use sluice_core::{
    AdaptiveLoadBalancer, BreakerPolicy, DistributionSystem, NodeId, NodeSpec, RequestType,
    RetryPolicy,
};

fn balancer() -> AdaptiveLoadBalancer {
    let router = Arc::new(DistributionSystem::new(
        RouterConfig::default(),
        BreakerPolicy::default(),
    ));
    router.register_node(NodeSpec::new("n1", "h", 1, "inference-svc"));
    AdaptiveLoadBalancer::new(router, BalancerConfig::default(), RetryPolicy::default())
}

proptest! {
    #[test]
    fn weight_stays_within_bounds(
        outcomes in prop::collection::vec((any::<bool>(), 0.0f64..20_000.0), 0..200)
    ) {
        let lb = balancer();
        let id = NodeId::from("n1");
        let node = lb.router().node(&id).unwrap();

        for (success, response_time_ms) in outcomes {
            lb.record_feedback(&id, success, response_time_ms, RequestType::ImageAnalysis);
            let weight = node.weight();
            prop_assert!((0.1..=2.0).contains(&weight), "weight {} out of bounds", weight);
        }
    }

    #[test]
    fn error_count_never_exceeds_request_count(
        outcomes in prop::collection::vec(any::<bool>(), 0..100)
    ) {
        let lb = balancer();
        let id = NodeId::from("n1");
        let node = lb.router().node(&id).unwrap();

        for success in outcomes {
            lb.record_feedback(&id, success, 10.0, RequestType::DatabaseQuery);
            prop_assert!(node.error_count() <= node.request_count());
        }
    }
}
