//! Sluice Admin Control Plane
//!
//! Handles Unix socket connections and ProtoBuf framing for dynamic node
//! membership: registering and removing nodes, pushing load reports and
//! listing node state while the proxy runs.
//!
//! Every message on the socket is a 4-byte big-endian length followed by a
//! protobuf-encoded [`proto::AdminRequest`] or [`proto::AdminResponse`].

pub mod client;
pub mod codec;
pub mod error;
pub mod proto;
pub mod server;

pub use client::AdminClient;
pub use error::AdminError;
pub use server::{spawn_admin_plane, AdminServer};
