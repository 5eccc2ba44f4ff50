//! Sluice Proxy binary.
//!
//! Loads configuration, registers the bootstrap nodes, starts the health
//! prober and admin control plane, then serves the HTTP front door.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sluice_admin::spawn_admin_plane;
use sluice_core::{AdaptiveLoadBalancer, DistributionSystem, SluiceConfig};
use sluice_proxy::health_check::spawn_health_checker;
use sluice_proxy::tls::load_tls_acceptor;
use sluice_proxy::{server, AppState};

/// Environment variable naming the config file when no argument is given.
const CONFIG_ENV: &str = "SLUICE_CONFIG";

fn init_tracing() {
    // Default to INFO; RUST_LOG overrides.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

fn load_config() -> Result<SluiceConfig, sluice_core::ConfigError> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    match path {
        Some(path) => {
            info!(path = %path.display(), "config.loading");
            sluice_core::load_from_file(&path)
        }
        None => {
            info!("config.defaults");
            Ok(SluiceConfig::default())
        }
    }
}

/// The primary entrypoint for the Sluice proxy.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();
    info!("Starting Sluice Proxy Engine...");

    let config = load_config()?;

    let router = Arc::new(DistributionSystem::from_config(&config));
    for spec in &config.nodes {
        router.register_node(spec.clone());
    }
    let balancer = Arc::new(AdaptiveLoadBalancer::from_config(router.clone(), &config));

    let server_config = &config.server;
    if server_config.health_check_interval_ms > 0 {
        spawn_health_checker(
            router.clone(),
            Duration::from_millis(server_config.health_check_interval_ms),
            Duration::from_millis(server_config.health_check_timeout_ms),
        );
    }

    let admin = spawn_admin_plane(&server_config.admin_socket, router.clone())?;

    let tls_acceptor = match (&server_config.tls_cert, &server_config.tls_key) {
        (Some(cert), Some(key)) => Some(load_tls_acceptor(cert, key)?),
        _ => None,
    };

    let addr: SocketAddr = server_config.listen_addr.parse()?;
    let state = AppState::new(balancer);

    tokio::select! {
        result = server::start_server(addr, tls_acceptor, state) => {
            if let Err(err) = result {
                warn!(error = %err, "server.failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown.signal");
        }
    }

    admin.abort();
    if let Err(err) = std::fs::remove_file(&server_config.admin_socket) {
        warn!(error = %err, "failed to remove admin socket");
    }

    info!("Shutting down gracefully.");
    Ok(())
}
