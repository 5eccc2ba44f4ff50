//! Background prober for active TCP health checks.

use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{info, warn};

use sluice_core::{NodeId, SharedDistributionSystem};

/// Probe every registered node once and feed the outcomes to the router.
///
/// Returns each node's reachability, in registration order.
pub async fn probe_once(
    router: &SharedDistributionSystem,
    connect_timeout: Duration,
) -> Vec<(NodeId, bool)> {
    let nodes = router.nodes();
    let mut outcomes = Vec::with_capacity(nodes.len());

    for node in nodes.iter() {
        let addr = format!("{}:{}", node.host, node.port);
        let reachable = matches!(
            time::timeout(connect_timeout, TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        );
        router.record_probe(&node.id, reachable);
        outcomes.push((node.id.clone(), reachable));
    }
    outcomes
}

/// Spawns a background task that probes every node each `interval`.
///
/// Reachability changes are logged; the first round runs one interval after start.
pub fn spawn_health_checker(
    router: SharedDistributionSystem,
    interval: Duration,
    connect_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut last_seen: HashMap<NodeId, bool> = HashMap::new();

        // Prevent immediately ticking when spawned
        ticker.tick().await;

        loop {
            ticker.tick().await;

            for (id, reachable) in probe_once(&router, connect_timeout).await {
                let previous = last_seen.insert(id.clone(), reachable);
                match (previous, reachable) {
                    (Some(false), true) => info!(node_id = %id, "health_check.reachable"),
                    (Some(true) | None, false) => warn!(node_id = %id, "health_check.unreachable"),
                    _ => {}
                }
            }
        }
    })
}
