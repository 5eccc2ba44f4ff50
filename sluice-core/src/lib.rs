//! Sluice Core functionality.
//!
//! This crate contains the node records, circuit breakers, request router and
//! adaptive load balancer that decide which backend node handles a unit of
//! work. It never performs the work itself: callers get a destination and a
//! timeout budget, or hand [`AdaptiveLoadBalancer::execute_with_retry`] an
//! operation to drive.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sluice_core::{AdaptiveLoadBalancer, DistributionSystem, NodeSpec, Priority, RequestType, SluiceConfig};
//!
//! # async fn run() {
//! let config = SluiceConfig::default();
//! let router = Arc::new(DistributionSystem::from_config(&config));
//! router.register_node(NodeSpec::new("inference-1", "10.0.0.5", 8001, "inference-svc"));
//!
//! let balancer = AdaptiveLoadBalancer::from_config(router, &config);
//! let answer = balancer
//!     .execute_with_retry(RequestType::ImageAnalysis, Priority::High, |url, timeout| async move {
//!         // Call `url`, honouring `timeout`.
//!         Ok::<_, std::io::Error>(format!("{url} answered within {timeout:?}"))
//!     })
//!     .await;
//! # let _ = answer;
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod load_balancer;
pub mod router;

pub use config::{load_from_file, load_from_str, ConfigError, SluiceConfig};
pub use domain::circuit::{Availability, BreakerPolicy, NodeStatus};
pub use domain::node::{Node, NodeId, NodeSnapshot, NodeSpec, SharedNode};
pub use domain::request::{Priority, PriorityTimeouts, RequestType, ServicePools};
pub use domain::routing::RouteResult;
pub use error::{ExecuteError, RouteError};
pub use load_balancer::adaptive::{AdaptiveLoadBalancer, BalancerStats};
pub use load_balancer::feedback::FeedbackRecord;
pub use load_balancer::retry::RetryPolicy;
pub use router::{DistributionSystem, SharedDistributionSystem};
