//! Proxy errors.

use hyper::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Failure while forwarding a request to a backend node.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The node URL could not be turned into a request target.
    #[error("invalid node url '{0}'")]
    InvalidUrl(String),

    /// No TCP connection could be established.
    #[error("failed to connect to {authority}: {source}")]
    Connect {
        /// `host:port` of the node.
        authority: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP exchange failed.
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    /// The request could not be built.
    #[error("bad request: {0}")]
    Request(#[from] hyper::http::Error),

    /// The attempt ran past its timeout budget.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The node answered with a server error.
    #[error("node answered {0}")]
    Status(StatusCode),
}
