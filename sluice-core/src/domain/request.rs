//! Request classification: what kind of work, how urgent, and which pools may serve it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Kind of work a caller wants routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    /// Satellite or aerial image analysis.
    ImageAnalysis,
    /// Low-latency detection on live feeds.
    RealTimeDetection,
    /// Bulk offline jobs.
    BatchProcessing,
    /// Reads against the primary datastore.
    DatabaseQuery,
    /// Geometry and spatial-index queries.
    GeoSpatial,
    /// Model inference.
    MachineLearning,
}

impl RequestType {
    /// Every request type.
    pub const ALL: [RequestType; 6] = [
        RequestType::ImageAnalysis,
        RequestType::RealTimeDetection,
        RequestType::BatchProcessing,
        RequestType::DatabaseQuery,
        RequestType::GeoSpatial,
        RequestType::MachineLearning,
    ];

    /// Wire label, e.g. `IMAGE_ANALYSIS`.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::ImageAnalysis => "IMAGE_ANALYSIS",
            RequestType::RealTimeDetection => "REAL_TIME_DETECTION",
            RequestType::BatchProcessing => "BATCH_PROCESSING",
            RequestType::DatabaseQuery => "DATABASE_QUERY",
            RequestType::GeoSpatial => "GEO_SPATIAL",
            RequestType::MachineLearning => "MACHINE_LEARNING",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a label names no known request type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown request type: {0}")]
pub struct ParseRequestTypeError(pub String);

impl FromStr for RequestType {
    type Err = ParseRequestTypeError;

    /// Accepts the wire label in any case, with `-` or `_` separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_uppercase();
        RequestType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ParseRequestTypeError(s.to_string()))
    }
}

/// Urgency class, which decides the timeout budget.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Tightest budget.
    Critical,
    /// Interactive work.
    High,
    /// Default class.
    #[default]
    Medium,
    /// Background work.
    Low,
}

impl Priority {
    /// Wire label, e.g. `CRITICAL`.
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }

    /// Lenient parse used at the edges: unknown labels fall back to the default class.
    pub fn from_label(label: &str) -> Priority {
        label.parse().unwrap_or_default()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a label names no known priority.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown priority: {0}")]
pub struct ParsePriorityError(pub String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(Priority::Critical),
            "HIGH" => Ok(Priority::High),
            "MEDIUM" => Ok(Priority::Medium),
            "LOW" => Ok(Priority::Low),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}

/// Timeout budget per priority class, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityTimeouts {
    /// Budget for `CRITICAL`.
    pub critical_ms: u64,
    /// Budget for `HIGH`.
    pub high_ms: u64,
    /// Budget for `MEDIUM`.
    pub medium_ms: u64,
    /// Budget for `LOW`.
    pub low_ms: u64,
}

impl Default for PriorityTimeouts {
    fn default() -> Self {
        Self {
            critical_ms: 5_000,
            high_ms: 10_000,
            medium_ms: 30_000,
            low_ms: 60_000,
        }
    }
}

impl PriorityTimeouts {
    /// Budget for a priority class.
    pub fn timeout_for(&self, priority: Priority) -> Duration {
        let ms = match priority {
            Priority::Critical => self.critical_ms,
            Priority::High => self.high_ms,
            Priority::Medium => self.medium_ms,
            Priority::Low => self.low_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Default pool of inference nodes.
pub const INFERENCE_POOL: &str = "inference-svc";
/// Default pool of batch pipeline nodes.
pub const PIPELINE_POOL: &str = "pipeline-svc";
/// Default pool of gateway nodes fronting the datastore.
pub const GATEWAY_POOL: &str = "gateway-svc";

/// Static mapping from request type to the service pools allowed to serve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServicePools(HashMap<RequestType, Vec<String>>);

impl Default for ServicePools {
    fn default() -> Self {
        let pools = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        let mut map = HashMap::new();
        map.insert(RequestType::ImageAnalysis, pools(&[INFERENCE_POOL]));
        map.insert(RequestType::RealTimeDetection, pools(&[INFERENCE_POOL]));
        map.insert(
            RequestType::BatchProcessing,
            pools(&[INFERENCE_POOL, PIPELINE_POOL]),
        );
        map.insert(RequestType::DatabaseQuery, pools(&[GATEWAY_POOL]));
        map.insert(
            RequestType::GeoSpatial,
            pools(&[INFERENCE_POOL, GATEWAY_POOL]),
        );
        map.insert(RequestType::MachineLearning, pools(&[INFERENCE_POOL]));
        Self(map)
    }
}

impl ServicePools {
    /// An empty table. Every request type is then incompatible.
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Pools allowed to serve `request_type`; empty when none are configured.
    pub fn pools_for(&self, request_type: RequestType) -> &[String] {
        self.0
            .get(&request_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `service_name` may serve `request_type`.
    pub fn serves(&self, request_type: RequestType, service_name: &str) -> bool {
        self.pools_for(request_type).iter().any(|p| p == service_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_labels_roundtrip() {
        for request_type in RequestType::ALL {
            assert_eq!(request_type.as_str().parse::<RequestType>(), Ok(request_type));
        }
        assert_eq!(
            "geo-spatial".parse::<RequestType>(),
            Ok(RequestType::GeoSpatial)
        );
        assert!("TELEPORT".parse::<RequestType>().is_err());
    }

    #[test]
    fn test_priority_timeouts() {
        let timeouts = PriorityTimeouts::default();
        assert_eq!(timeouts.timeout_for(Priority::Critical), Duration::from_secs(5));
        assert_eq!(timeouts.timeout_for(Priority::High), Duration::from_secs(10));
        assert_eq!(timeouts.timeout_for(Priority::Medium), Duration::from_secs(30));
        assert_eq!(timeouts.timeout_for(Priority::Low), Duration::from_secs(60));
    }

    #[test]
    fn test_unknown_priority_label_gets_default_budget() {
        let priority = Priority::from_label("URGENT-ISH");
        assert_eq!(priority, Priority::Medium);
        assert_eq!(
            PriorityTimeouts::default().timeout_for(priority),
            Duration::from_secs(30)
        );
        assert_eq!(Priority::from_label("high"), Priority::High);
    }

    #[test]
    fn test_default_priority_is_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_default_pool_table_shape() {
        let pools = ServicePools::default();
        assert_eq!(pools.pools_for(RequestType::ImageAnalysis), [INFERENCE_POOL]);
        assert_eq!(pools.pools_for(RequestType::RealTimeDetection), [INFERENCE_POOL]);
        assert_eq!(
            pools.pools_for(RequestType::BatchProcessing),
            [INFERENCE_POOL, PIPELINE_POOL]
        );
        assert_eq!(pools.pools_for(RequestType::DatabaseQuery), [GATEWAY_POOL]);
        assert_eq!(
            pools.pools_for(RequestType::GeoSpatial),
            [INFERENCE_POOL, GATEWAY_POOL]
        );
        assert_eq!(pools.pools_for(RequestType::MachineLearning), [INFERENCE_POOL]);
        assert!(pools.serves(RequestType::GeoSpatial, GATEWAY_POOL));
        assert!(!pools.serves(RequestType::DatabaseQuery, PIPELINE_POOL));
    }

    #[test]
    fn test_empty_table_has_no_pools() {
        assert!(ServicePools::empty()
            .pools_for(RequestType::ImageAnalysis)
            .is_empty());
    }
}
