//! Unix socket listener for the admin control plane.

use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use sluice_core::{NodeId, SharedDistributionSystem};

use crate::codec::{read_frame, write_message};
use crate::error::AdminError;
use crate::proto::{admin_request::Command, AdminRequest, AdminResponse, NodeInfo};

/// A bound admin socket, ready to serve.
#[derive(Debug)]
pub struct AdminServer {
    listener: UnixListener,
    path: PathBuf,
    router: SharedDistributionSystem,
}

impl AdminServer {
    /// Bind the socket at `path`, replacing a stale socket file left by an
    /// earlier run.
    pub fn bind(path: impl AsRef<Path>, router: SharedDistributionSystem) -> Result<Self, AdminError> {
        let path = path.as_ref().to_path_buf();
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale admin socket"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let listener = UnixListener::bind(&path)?;
        Ok(Self {
            listener,
            path,
            router,
        })
    }

    /// Socket path this server listens on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until the listener fails. Each connection is
    /// served on its own task.
    pub async fn serve(self) -> Result<(), AdminError> {
        info!(path = %self.path.display(), "admin.listening");
        let mut incoming = UnixListenerStream::new(self.listener);

        while let Some(stream) = incoming.next().await {
            let stream = stream?;
            let router = self.router.clone();
            tokio::spawn(async move {
                if let Err(err) = serve_connection(stream, router).await {
                    warn!(error = %err, "admin.connection_failed");
                }
            });
        }
        Ok(())
    }
}

/// Bind the admin socket and serve it on a background task.
pub fn spawn_admin_plane(
    path: impl AsRef<Path>,
    router: SharedDistributionSystem,
) -> Result<JoinHandle<()>, AdminError> {
    let server = AdminServer::bind(path, router)?;
    Ok(tokio::spawn(async move {
        if let Err(err) = server.serve().await {
            warn!(error = %err, "admin.stopped");
        }
    }))
}

async fn serve_connection(
    mut stream: UnixStream,
    router: SharedDistributionSystem,
) -> Result<(), AdminError> {
    while let Some(frame) = read_frame(&mut stream).await? {
        // Framing is intact after a bad body, so the connection stays usable.
        let response = match <AdminRequest as prost::Message>::decode(frame.as_slice()) {
            Ok(request) => handle_request(&router, request),
            Err(err) => AdminResponse::error(format!("malformed request: {err}")),
        };
        write_message(&mut stream, &response).await?;
    }
    Ok(())
}

/// Apply one command to the router.
pub fn handle_request(router: &SharedDistributionSystem, request: AdminRequest) -> AdminResponse {
    let Some(command) = request.command else {
        return AdminResponse::error("request carries no command");
    };

    match command {
        Command::RegisterNode(register) => match register.into_spec() {
            Ok(spec) => {
                let node = router.register_node(spec);
                info!(node_id = %node.id, "admin.node_registered");
                AdminResponse::ok(format!("registered {} at {}", node.id, node.url()))
            }
            Err(reason) => AdminResponse::error(reason),
        },
        Command::UnregisterNode(unregister) => {
            let id = NodeId::new(unregister.node_id);
            if router.unregister_node(&id) {
                AdminResponse::ok(format!("unregistered {id}"))
            } else {
                AdminResponse::error(format!("unknown node {id}"))
            }
        }
        Command::ReportLoad(report) => {
            let id = NodeId::new(report.node_id);
            if router.report_load(&id, report.cpu_usage, report.memory_usage) {
                AdminResponse::ok(format!("load recorded for {id}"))
            } else {
                AdminResponse::error(format!("unknown node {id}"))
            }
        }
        Command::ListNodes(_) => {
            let nodes: Vec<NodeInfo> = router.nodes_status().iter().map(NodeInfo::from).collect();
            AdminResponse {
                ok: true,
                message: format!("{} nodes", nodes.len()),
                nodes,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{ListNodes, RegisterNode, ReportLoad, UnregisterNode};
    use sluice_core::config::RouterConfig;
    use sluice_core::{BreakerPolicy, DistributionSystem};
    use std::sync::Arc;

    fn router() -> SharedDistributionSystem {
        Arc::new(DistributionSystem::new(
            RouterConfig::default(),
            BreakerPolicy::default(),
        ))
    }

    fn request(command: Command) -> AdminRequest {
        AdminRequest {
            command: Some(command),
        }
    }

    fn register(id: &str) -> Command {
        Command::RegisterNode(RegisterNode {
            node_id: id.into(),
            host: "10.0.0.7".into(),
            port: 9000,
            service_name: "pipeline-svc".into(),
            max_connections: 0,
        })
    }

    #[test]
    fn test_register_and_list() {
        let router = router();
        let reply = handle_request(&router, request(register("p1")));
        assert!(reply.ok, "{}", reply.message);

        let listed = handle_request(&router, request(Command::ListNodes(ListNodes {})));
        assert_eq!(listed.nodes.len(), 1);
        assert_eq!(listed.nodes[0].node_id, "p1");
        assert_eq!(listed.nodes[0].url, "http://10.0.0.7:9000");
        assert_eq!(listed.nodes[0].status, "HEALTHY");
        assert!(listed.nodes[0].available);
    }

    #[test]
    fn test_unknown_nodes_are_reported() {
        let router = router();
        let reply = handle_request(
            &router,
            request(Command::UnregisterNode(UnregisterNode {
                node_id: "ghost".into(),
            })),
        );
        assert!(!reply.ok);

        let reply = handle_request(
            &router,
            request(Command::ReportLoad(ReportLoad {
                node_id: "ghost".into(),
                cpu_usage: 1.0,
                memory_usage: 1.0,
            })),
        );
        assert!(!reply.ok);
    }

    #[test]
    fn test_report_load_reaches_the_node() {
        let router = router();
        handle_request(&router, request(register("p1")));
        let reply = handle_request(
            &router,
            request(Command::ReportLoad(ReportLoad {
                node_id: "p1".into(),
                cpu_usage: 80.0,
                memory_usage: 20.0,
            })),
        );
        assert!(reply.ok);
        assert_eq!(router.node(&NodeId::from("p1")).unwrap().cpu_usage(), 80.0);
    }

    #[test]
    fn test_empty_request_is_rejected() {
        let reply = handle_request(&router(), AdminRequest { command: None });
        assert!(!reply.ok);
    }
}
