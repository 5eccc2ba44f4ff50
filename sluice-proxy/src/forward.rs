//! HTTP/1.1 forwarding to backend nodes.

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::connection_pool::{BackendSender, ConnectionPool};
use crate::error::ForwardError;

/// A backend reply that was not a server error.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedResponse {
    /// Status returned by the node.
    pub status: StatusCode,
    /// Full response body.
    pub body: Bytes,
}

/// Forwards dispatched work to nodes, reusing idle connections.
#[derive(Debug, Clone, Default)]
pub struct Forwarder {
    pool: ConnectionPool,
}

impl Forwarder {
    /// A forwarder with an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// The idle connection pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// POST `body` to `path` on the node at `node_url` within `budget`.
    ///
    /// A 5xx answer is an error so the attempt counts as a node failure.
    pub async fn forward(
        &self,
        node_url: &str,
        path: &str,
        body: Bytes,
        budget: Duration,
    ) -> Result<ForwardedResponse, ForwardError> {
        let authority = node_url
            .strip_prefix("http://")
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .ok_or_else(|| ForwardError::InvalidUrl(node_url.to_string()))?;

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(HOST, authority)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Full::new(body))?;

        let response = tokio::time::timeout(budget, self.exchange(authority, request))
            .await
            .map_err(|_| ForwardError::Timeout(budget))??;

        if response.status.is_server_error() {
            return Err(ForwardError::Status(response.status));
        }
        Ok(response)
    }

    async fn exchange(
        &self,
        authority: &str,
        request: Request<Full<Bytes>>,
    ) -> Result<ForwardedResponse, ForwardError> {
        let mut sender = match self.pool.try_pop(authority) {
            Some(pooled) => pooled,
            None => connect(authority).await?,
        };
        if sender.ready().await.is_err() {
            sender = connect(authority).await?;
            sender.ready().await?;
        }

        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        self.pool.push(authority, sender);
        Ok(ForwardedResponse { status, body })
    }
}

async fn connect(authority: &str) -> Result<BackendSender, ForwardError> {
    let stream = TcpStream::connect(authority)
        .await
        .map_err(|source| ForwardError::Connect {
            authority: authority.to_string(),
            source,
        })?;

    let (sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
    let authority = authority.to_string();
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            debug!(%authority, error = %err, "backend connection closed");
        }
    });
    Ok(sender)
}
