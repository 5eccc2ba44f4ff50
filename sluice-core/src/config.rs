//! Configuration schema, TOML loading and validation.
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! working engine with the standard routing tables and thresholds.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::circuit::BreakerPolicy;
use crate::domain::node::NodeSpec;
use crate::domain::request::{PriorityTimeouts, ServicePools, GATEWAY_POOL, INFERENCE_POOL, PIPELINE_POOL};
use crate::load_balancer::retry::RetryPolicy;

/// Upper bound on `balancer.feedback_capacity`.
pub const MAX_FEEDBACK_CAPACITY: usize = 1_000_000;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{file}': {source}")]
    Io {
        /// Path of the file.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config '{file}': {source}")]
    Parse {
        /// Path or name of the source.
        file: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
    /// A value violates a semantic constraint.
    #[error("invalid config value for '{field}': {reason}")]
    Validation {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SluiceConfig {
    /// Routing tables and cache.
    pub router: RouterConfig,
    /// Circuit-breaker thresholds.
    pub breaker: BreakerConfig,
    /// Adaptive weight tuning and feedback history.
    pub balancer: BalancerConfig,
    /// Retry and backoff.
    pub retry: RetryConfig,
    /// Front door, admin socket and health prober.
    pub server: ServerConfig,
    /// Nodes registered at start-up.
    pub nodes: Vec<NodeSpec>,
}

impl Default for SluiceConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            breaker: BreakerConfig::default(),
            balancer: BalancerConfig::default(),
            retry: RetryConfig::default(),
            server: ServerConfig::default(),
            nodes: default_nodes(),
        }
    }
}

fn default_nodes() -> Vec<NodeSpec> {
    vec![
        NodeSpec::new("inference-1", "inference-svc", 8001, INFERENCE_POOL),
        NodeSpec::new("gateway-1", "gateway-svc", 8000, GATEWAY_POOL),
        NodeSpec::new("pipeline-1", "pipeline-svc", 8010, PIPELINE_POOL),
    ]
}

/// Routing section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Lifetime of a cached route.
    pub cache_ttl_ms: u64,
    /// Timeout budget per priority class.
    pub timeouts: PriorityTimeouts,
    /// Request type to service pool table.
    pub pools: ServicePools,
    /// Weight of the newest sample in the response-time average.
    pub response_time_alpha: f64,
    /// Seed the response-time average with the first sample instead of blending against zero.
    pub seed_response_time: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 30_000,
            timeouts: PriorityTimeouts::default(),
            pools: ServicePools::default(),
            response_time_alpha: 0.3,
            seed_response_time: true,
        }
    }
}

impl RouterConfig {
    /// Route cache lifetime.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

/// Circuit-breaker section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open a node's circuit.
    pub failure_threshold: u32,
    /// Time a circuit stays open before a recovery probe is allowed.
    pub recovery_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
        }
    }
}

impl BreakerConfig {
    /// The runtime policy these values describe.
    pub fn policy(&self) -> BreakerPolicy {
        BreakerPolicy {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
        }
    }
}

/// Adaptive balancer section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Step size of weight adjustments.
    pub learning_rate: f64,
    /// Lower weight bound.
    pub min_weight: f64,
    /// Upper weight bound.
    pub max_weight: f64,
    /// Response time at which a success earns the minimum performance factor.
    pub slow_response_ms: f64,
    /// Floor of the performance factor applied on success.
    pub min_perf_factor: f64,
    /// Multiplier of the learning rate applied on failure.
    pub failure_penalty: f64,
    /// Feedback records kept before trimming.
    pub feedback_capacity: usize,
    /// Feedback records kept after trimming.
    pub feedback_retain: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            min_weight: 0.1,
            max_weight: 2.0,
            slow_response_ms: 5_000.0,
            min_perf_factor: 0.5,
            failure_penalty: 2.0,
            feedback_capacity: 10_000,
            feedback_retain: 5_000,
        }
    }
}

/// Retry section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per execution, the first one included.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay_ms: u64,
    /// Cap on any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// The runtime policy these values describe.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Front door and background task section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub listen_addr: String,
    /// Unix socket path of the admin control plane.
    pub admin_socket: PathBuf,
    /// Interval between active health probes. `0` disables probing.
    pub health_check_interval_ms: u64,
    /// Connect timeout of a single probe.
    pub health_check_timeout_ms: u64,
    /// PEM certificate for TLS termination.
    pub tls_cert: Option<PathBuf>,
    /// PEM private key for TLS termination.
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            admin_socket: PathBuf::from("/tmp/sluice-admin.sock"),
            health_check_interval_ms: 5_000,
            health_check_timeout_ms: 1_500,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl SluiceConfig {
    /// Check semantic constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let alpha = self.router.response_time_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::invalid(
                "router.response_time_alpha",
                format!("must be in (0, 1], got {alpha}"),
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "breaker.failure_threshold",
                "must be at least 1",
            ));
        }

        let b = &self.balancer;
        if !(b.min_weight > 0.0 && b.min_weight <= b.max_weight) {
            return Err(ConfigError::invalid(
                "balancer.min_weight",
                format!(
                    "must be positive and not above max_weight ({} > {})",
                    b.min_weight, b.max_weight
                ),
            ));
        }
        if !(b.learning_rate.is_finite() && b.learning_rate >= 0.0) {
            return Err(ConfigError::invalid(
                "balancer.learning_rate",
                "must be a non-negative number",
            ));
        }
        if !(b.slow_response_ms > 0.0) {
            return Err(ConfigError::invalid(
                "balancer.slow_response_ms",
                "must be positive",
            ));
        }
        if b.feedback_capacity > MAX_FEEDBACK_CAPACITY {
            return Err(ConfigError::invalid(
                "balancer.feedback_capacity",
                format!(
                    "must not exceed {MAX_FEEDBACK_CAPACITY}, got {}",
                    b.feedback_capacity
                ),
            ));
        }
        if b.feedback_retain == 0 || b.feedback_retain > b.feedback_capacity {
            return Err(ConfigError::invalid(
                "balancer.feedback_retain",
                format!(
                    "must be between 1 and feedback_capacity ({})",
                    b.feedback_capacity
                ),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }

        if self.server.tls_cert.is_some() != self.server.tls_key.is_some() {
            return Err(ConfigError::invalid(
                "server.tls_cert",
                "tls_cert and tls_key must be set together",
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(&node.node_id) {
                return Err(ConfigError::invalid(
                    "nodes",
                    format!("duplicate node id '{}'", node.node_id),
                ));
            }
            if node.max_connections == 0 {
                return Err(ConfigError::invalid(
                    "nodes.max_connections",
                    format!("node '{}' must allow at least one connection", node.node_id),
                ));
            }
        }

        Ok(())
    }
}

/// Load and validate a [`SluiceConfig`] from a TOML file.
pub fn load_from_file(path: &Path) -> Result<SluiceConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load and validate a [`SluiceConfig`] from TOML text. `source_name` only labels errors.
pub fn load_from_str(content: &str, source_name: &str) -> Result<SluiceConfig, ConfigError> {
    let config: SluiceConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}
