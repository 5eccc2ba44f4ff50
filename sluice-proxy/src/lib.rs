//! Sluice Proxy Engine
//!
//! The Tokio async front door: accepts dispatch requests over HTTP, lets the
//! adaptive load balancer pick a node, forwards the work over pooled backend
//! connections and keeps node health current with active probes.

pub mod connection_pool;
pub mod error;
pub mod forward;
pub mod health_check;
pub mod server;
pub mod tls;

pub use error::ForwardError;
pub use forward::{ForwardedResponse, Forwarder};
pub use server::{serve, start_server, AppState, SharedState};
