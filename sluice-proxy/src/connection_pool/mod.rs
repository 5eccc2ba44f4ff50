//! Backend connection reuse.

pub mod pool;

pub use pool::{BackendSender, ConnectionPool};
