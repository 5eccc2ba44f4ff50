//! Protobuf messages spoken on the admin socket.
//!
//! Field tags are part of the wire contract; never renumber them.

use prost::Message;
use sluice_core::{NodeSnapshot, NodeSpec};

/// A single control plane command.
#[derive(Clone, PartialEq, Message)]
pub struct AdminRequest {
    /// The command to run. A request without one is rejected.
    #[prost(oneof = "admin_request::Command", tags = "1, 2, 3, 4")]
    pub command: Option<admin_request::Command>,
}

/// Nested types for [`AdminRequest`].
pub mod admin_request {
    /// Commands understood by the admin plane.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Command {
        /// Add or replace a node.
        #[prost(message, tag = "1")]
        RegisterNode(super::RegisterNode),
        /// Remove a node.
        #[prost(message, tag = "2")]
        UnregisterNode(super::UnregisterNode),
        /// Push CPU and memory usage for a node.
        #[prost(message, tag = "3")]
        ReportLoad(super::ReportLoad),
        /// List every node.
        #[prost(message, tag = "4")]
        ListNodes(super::ListNodes),
    }
}

/// Register a node, replacing any node with the same id.
#[derive(Clone, PartialEq, Message)]
pub struct RegisterNode {
    /// Unique node id.
    #[prost(string, tag = "1")]
    pub node_id: String,
    /// Host the node listens on.
    #[prost(string, tag = "2")]
    pub host: String,
    /// Port the node listens on; must fit in 16 bits.
    #[prost(uint32, tag = "3")]
    pub port: u32,
    /// Service pool the node belongs to.
    #[prost(string, tag = "4")]
    pub service_name: String,
    /// Connection capacity; `0` selects the default.
    #[prost(uint32, tag = "5")]
    pub max_connections: u32,
}

/// Remove a node.
#[derive(Clone, PartialEq, Message)]
pub struct UnregisterNode {
    /// Id of the node to remove.
    #[prost(string, tag = "1")]
    pub node_id: String,
}

/// Externally observed load for a node.
#[derive(Clone, PartialEq, Message)]
pub struct ReportLoad {
    /// Id of the reporting node.
    #[prost(string, tag = "1")]
    pub node_id: String,
    /// CPU usage in percent.
    #[prost(double, tag = "2")]
    pub cpu_usage: f64,
    /// Memory usage in percent.
    #[prost(double, tag = "3")]
    pub memory_usage: f64,
}

/// List every registered node.
#[derive(Clone, PartialEq, Message)]
pub struct ListNodes {}

/// Reply to any [`AdminRequest`].
#[derive(Clone, PartialEq, Message)]
pub struct AdminResponse {
    /// Whether the command took effect.
    #[prost(bool, tag = "1")]
    pub ok: bool,
    /// Human-readable outcome.
    #[prost(string, tag = "2")]
    pub message: String,
    /// Node state; filled by `ListNodes` only.
    #[prost(message, repeated, tag = "3")]
    pub nodes: Vec<NodeInfo>,
}

/// Wire form of a node snapshot.
#[derive(Clone, PartialEq, Message)]
pub struct NodeInfo {
    /// Node id.
    #[prost(string, tag = "1")]
    pub node_id: String,
    /// Service pool.
    #[prost(string, tag = "2")]
    pub service: String,
    /// Base URL.
    #[prost(string, tag = "3")]
    pub url: String,
    /// Health status label, e.g. `HEALTHY` or `CIRCUIT_OPEN`.
    #[prost(string, tag = "4")]
    pub status: String,
    /// Composite load score.
    #[prost(double, tag = "5")]
    pub load_score: f64,
    /// In-flight requests.
    #[prost(uint64, tag = "6")]
    pub active_connections: u64,
    /// Connection capacity.
    #[prost(uint32, tag = "7")]
    pub max_connections: u32,
    /// Smoothed response time.
    #[prost(double, tag = "8")]
    pub avg_response_time_ms: f64,
    /// Requests observed.
    #[prost(uint64, tag = "9")]
    pub request_count: u64,
    /// Failed requests observed.
    #[prost(uint64, tag = "10")]
    pub error_count: u64,
    /// Feedback weight.
    #[prost(double, tag = "11")]
    pub weight: f64,
    /// Whether the circuit currently admits traffic.
    #[prost(bool, tag = "12")]
    pub available: bool,
}

impl AdminResponse {
    /// A successful reply.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            nodes: Vec::new(),
        }
    }

    /// A rejected command.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            nodes: Vec::new(),
        }
    }
}

impl From<&NodeSnapshot> for NodeInfo {
    fn from(s: &NodeSnapshot) -> Self {
        Self {
            node_id: s.node_id.to_string(),
            service: s.service.clone(),
            url: s.url.clone(),
            status: s.status.as_str().to_string(),
            load_score: s.load_score,
            active_connections: s.active_connections,
            max_connections: s.max_connections,
            avg_response_time_ms: s.avg_response_time_ms,
            request_count: s.request_count,
            error_count: s.error_count,
            weight: s.weight,
            available: s.is_available,
        }
    }
}

impl From<&NodeSpec> for RegisterNode {
    fn from(spec: &NodeSpec) -> Self {
        Self {
            node_id: spec.node_id.to_string(),
            host: spec.host.clone(),
            port: u32::from(spec.port),
            service_name: spec.service_name.clone(),
            max_connections: spec.max_connections,
        }
    }
}

impl RegisterNode {
    /// Validate the command into a [`NodeSpec`].
    pub fn into_spec(self) -> Result<NodeSpec, String> {
        if self.node_id.trim().is_empty() {
            return Err("node_id must not be empty".to_string());
        }
        if self.service_name.trim().is_empty() {
            return Err("service_name must not be empty".to_string());
        }
        let port = u16::try_from(self.port)
            .map_err(|_| format!("port {} is out of range", self.port))?;

        let spec = NodeSpec::new(self.node_id, self.host, port, self.service_name);
        Ok(match self.max_connections {
            0 => spec,
            n => spec.with_max_connections(n),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(port: u32, max_connections: u32) -> RegisterNode {
        RegisterNode {
            node_id: "n1".into(),
            host: "10.0.0.1".into(),
            port,
            service_name: "inference-svc".into(),
            max_connections,
        }
    }

    #[test]
    fn test_into_spec_defaults_capacity() {
        let spec = register(8001, 0).into_spec().unwrap();
        assert_eq!(spec.port, 8001);
        assert_eq!(spec.max_connections, 100);

        let spec = register(8001, 8).into_spec().unwrap();
        assert_eq!(spec.max_connections, 8);
    }

    #[test]
    fn test_into_spec_rejects_bad_input() {
        assert!(register(70_000, 0).into_spec().is_err());
        assert!(RegisterNode {
            node_id: " ".into(),
            ..register(1, 0)
        }
        .into_spec()
        .is_err());
    }

    #[test]
    fn test_request_survives_the_wire() {
        let request = AdminRequest {
            command: Some(admin_request::Command::ReportLoad(ReportLoad {
                node_id: "n1".into(),
                cpu_usage: 42.5,
                memory_usage: 10.0,
            })),
        };
        let bytes = request.encode_to_vec();
        assert_eq!(AdminRequest::decode(bytes.as_slice()).unwrap(), request);
    }
}
