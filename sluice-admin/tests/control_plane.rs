//! End-to-end admin plane tests over a real Unix socket.

use std::path::PathBuf;
use std::sync::Arc;

use sluice_admin::codec::{read_message, write_frame, write_message};
use sluice_admin::proto::{admin_request::Command, AdminRequest, AdminResponse, ListNodes};
use sluice_admin::{spawn_admin_plane, AdminClient};
use sluice_core::config::RouterConfig;
use sluice_core::{BreakerPolicy, DistributionSystem, NodeId, NodeSpec, SharedDistributionSystem};
use tokio::net::UnixStream;

fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sluice-admin-{}-{name}.sock", std::process::id()))
}

fn router() -> SharedDistributionSystem {
    Arc::new(DistributionSystem::new(
        RouterConfig::default(),
        BreakerPolicy::default(),
    ))
}

#[tokio::test]
async fn membership_changes_apply_to_the_router() {
    let path = socket_path("membership");
    let router = router();
    let server = spawn_admin_plane(&path, router.clone()).unwrap();

    let mut client = AdminClient::connect(&path).await.unwrap();

    let spec = NodeSpec::new("gw-1", "127.0.0.1", 7000, "gateway-svc").with_max_connections(20);
    let reply = client.register_node(&spec).await.unwrap();
    assert!(reply.ok, "{}", reply.message);
    assert_eq!(router.node_count(), 1);

    let reply = client.report_load("gw-1", 50.0, 25.0).await.unwrap();
    assert!(reply.ok);

    let nodes = client.list_nodes().await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].node_id, "gw-1");
    assert_eq!(nodes[0].max_connections, 20);
    assert!((nodes[0].load_score - (0.4 * 0.5 + 0.3 * 0.25)).abs() < 1e-9);

    assert!(client.unregister_node("gw-1").await.unwrap().ok);
    assert!(!client.unregister_node("gw-1").await.unwrap().ok);
    assert!(router.node(&NodeId::from("gw-1")).is_none());

    server.abort();
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn malformed_frame_gets_an_error_reply() {
    let path = socket_path("malformed");
    let server = spawn_admin_plane(&path, router()).unwrap();

    let mut stream = UnixStream::connect(&path).await.unwrap();
    write_frame(&mut stream, &[0xff, 0xff, 0xff]).await.unwrap();
    let reply: AdminResponse = read_message(&mut stream).await.unwrap().unwrap();
    assert!(!reply.ok);

    // The same connection still serves well-formed requests.
    let list = AdminRequest {
        command: Some(Command::ListNodes(ListNodes {})),
    };
    write_message(&mut stream, &list).await.unwrap();
    let reply: AdminResponse = read_message(&mut stream).await.unwrap().unwrap();
    assert!(reply.ok);
    assert!(reply.nodes.is_empty());

    server.abort();
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn rebinding_replaces_a_stale_socket() {
    let path = socket_path("stale");
    let first = spawn_admin_plane(&path, router()).unwrap();
    first.abort();

    let second = spawn_admin_plane(&path, router()).unwrap();
    let mut client = AdminClient::connect(&path).await.unwrap();
    assert!(client.list_nodes().await.unwrap().is_empty());

    second.abort();
    let _ = std::fs::remove_file(&path);
}
