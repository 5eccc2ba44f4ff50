//! Control plane errors.

use thiserror::Error;

/// Failure on the admin socket.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Socket I/O failed.
    #[error("admin socket I/O: {0}")]
    Io(#[from] std::io::Error),

    /// A frame did not hold a valid protobuf message.
    #[error("malformed admin message: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The peer broke the framing or command contract.
    #[error("admin protocol violation: {0}")]
    Protocol(String),
}
