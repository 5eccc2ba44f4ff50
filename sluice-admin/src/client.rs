//! Client side of the admin socket.

use std::path::Path;
use tokio::net::UnixStream;

use sluice_core::NodeSpec;

use crate::codec::{read_message, write_message};
use crate::error::AdminError;
use crate::proto::{
    admin_request::Command, AdminRequest, AdminResponse, ListNodes, NodeInfo, RegisterNode,
    ReportLoad, UnregisterNode,
};

/// A connection to a running admin plane.
///
/// Commands are sent one at a time; each waits for its reply.
#[derive(Debug)]
pub struct AdminClient {
    stream: UnixStream,
}

impl AdminClient {
    /// Connect to the admin socket at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, AdminError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self { stream })
    }

    /// Send a raw request and wait for the reply.
    pub async fn send(&mut self, request: &AdminRequest) -> Result<AdminResponse, AdminError> {
        write_message(&mut self.stream, request).await?;
        read_message(&mut self.stream)
            .await?
            .ok_or_else(|| AdminError::Protocol("admin plane closed the connection".into()))
    }

    async fn command(&mut self, command: Command) -> Result<AdminResponse, AdminError> {
        self.send(&AdminRequest {
            command: Some(command),
        })
        .await
    }

    /// Register or replace a node.
    pub async fn register_node(&mut self, spec: &NodeSpec) -> Result<AdminResponse, AdminError> {
        self.command(Command::RegisterNode(RegisterNode::from(spec)))
            .await
    }

    /// Remove a node.
    pub async fn unregister_node(&mut self, node_id: &str) -> Result<AdminResponse, AdminError> {
        self.command(Command::UnregisterNode(UnregisterNode {
            node_id: node_id.to_string(),
        }))
        .await
    }

    /// Push a load report for a node.
    pub async fn report_load(
        &mut self,
        node_id: &str,
        cpu_usage: f64,
        memory_usage: f64,
    ) -> Result<AdminResponse, AdminError> {
        self.command(Command::ReportLoad(ReportLoad {
            node_id: node_id.to_string(),
            cpu_usage,
            memory_usage,
        }))
        .await
    }

    /// Fetch every node's state.
    pub async fn list_nodes(&mut self) -> Result<Vec<NodeInfo>, AdminError> {
        let response = self.command(Command::ListNodes(ListNodes {})).await?;
        if !response.ok {
            return Err(AdminError::Protocol(response.message));
        }
        Ok(response.nodes)
    }
}
