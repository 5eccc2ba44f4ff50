//! Server module for handling incoming connections and HTTP parsing.
//!
//! Routes:
//!
//! - `GET /healthz` liveness and node count
//! - `GET /nodes` node snapshots
//! - `GET /stats` balancer statistics
//! - `POST /dispatch/{request_type}[/path]?priority=..&deadline_ms=..` routes
//!   the body to a node (as `POST /path`, other query parameters kept) with
//!   retries; bodies above [`MAX_DISPATCH_BODY`] are refused with 413

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use sluice_core::{AdaptiveLoadBalancer, ExecuteError, Priority, RequestType, RouteError};

use crate::error::ForwardError;
use crate::forward::{ForwardedResponse, Forwarder};

/// Header naming the node that served a dispatched request.
pub const NODE_URL_HEADER: &str = "x-sluice-node";

/// Largest dispatch body accepted, in bytes.
pub const MAX_DISPATCH_BODY: usize = 4 * 1024 * 1024;

/// Everything a request handler needs.
#[derive(Debug)]
pub struct AppState {
    /// Balancer wrapping the shared router.
    pub balancer: Arc<AdaptiveLoadBalancer>,
    /// Backend forwarder.
    pub forwarder: Forwarder,
}

/// Shared handler state.
pub type SharedState = Arc<AppState>;

impl AppState {
    /// State around `balancer` with a fresh forwarder.
    pub fn new(balancer: Arc<AdaptiveLoadBalancer>) -> SharedState {
        Arc::new(Self {
            balancer,
            forwarder: Forwarder::new(),
        })
    }
}

/// Binds `addr` and serves the front door until the listener fails.
pub async fn start_server(
    addr: SocketAddr,
    tls_acceptor: Option<TlsAcceptor>,
    state: SharedState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, tls_acceptor, state).await
}

/// Serves the front door on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    state: SharedState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!(
        addr = %listener.local_addr()?,
        tls = tls_acceptor.is_some(),
        "server.listening"
    );

    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();

        match &tls_acceptor {
            Some(acceptor) => {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => serve_connection(tls_stream, state).await,
                        Err(err) => warn!(%peer, error = %err, "tls.handshake_failed"),
                    }
                });
            }
            None => {
                tokio::spawn(serve_connection(stream, state));
            }
        }
    }
}

async fn serve_connection<S>(stream: S, state: SharedState)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| handle_request(state.clone(), req));
    if let Err(err) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(error = %err, "connection closed with error");
    }
}

/// Dispatches one front-door request.
async fn handle_request(
    state: SharedState,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(%method, %path, "request.received");

    let response = match (method, path.as_str()) {
        (Method::GET, "/healthz") => json(
            StatusCode::OK,
            &Health {
                status: "ok",
                nodes: state.balancer.router().node_count(),
            },
        ),
        (Method::GET, "/nodes") => json(StatusCode::OK, &state.balancer.router().nodes_status()),
        (Method::GET, "/stats") => json(StatusCode::OK, &state.balancer.stats()),
        (Method::POST, p) if p.starts_with("/dispatch/") => dispatch(&state, req).await?,
        _ => error_response(StatusCode::NOT_FOUND, "no such route"),
    };
    Ok(response)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    nodes: usize,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// Parameters of a dispatch call taken from the URI.
#[derive(Debug, PartialEq)]
struct DispatchTarget {
    request_type: RequestType,
    backend_path: String,
    priority: Priority,
    deadline: Option<Duration>,
}

fn parse_dispatch(path: &str, query: Option<&str>) -> Result<DispatchTarget, String> {
    let rest = path.strip_prefix("/dispatch/").unwrap_or_default();
    let (label, tail) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    let request_type: RequestType = label.parse().map_err(|err| format!("{err}"))?;

    let mut priority = Priority::default();
    let mut deadline = None;
    let mut passthrough = Vec::new();
    for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "priority" => priority = Priority::from_label(value),
            "deadline_ms" => {
                let ms: u64 = value
                    .parse()
                    .map_err(|_| format!("deadline_ms must be an integer, got '{value}'"))?;
                deadline = Some(Duration::from_millis(ms));
            }
            _ => passthrough.push(pair),
        }
    }

    let backend_path = if passthrough.is_empty() {
        tail.to_string()
    } else {
        format!("{tail}?{}", passthrough.join("&"))
    };

    Ok(DispatchTarget {
        request_type,
        backend_path,
        priority,
        deadline,
    })
}

async fn dispatch(
    state: &SharedState,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let target = match parse_dispatch(req.uri().path(), req.uri().query()) {
        Ok(target) => target,
        Err(reason) => return Ok(error_response(StatusCode::BAD_REQUEST, &reason)),
    };
    let body = match Limited::new(req.into_body(), MAX_DISPATCH_BODY).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) if err.is::<LengthLimitError>() => {
            return Ok(error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                &format!("body exceeds {MAX_DISPATCH_BODY} bytes"),
            ))
        }
        Err(err) => {
            debug!(error = %err, "request.body_read_failed");
            return Ok(error_response(StatusCode::BAD_REQUEST, "failed to read request body"));
        }
    };

    let forwarder = &state.forwarder;
    let path = target.backend_path.as_str();
    let operation = |url: String, budget: Duration| {
        let body = body.clone();
        async move {
            forwarder
                .forward(&url, path, body, budget)
                .await
                .map(|response| (url, response))
        }
    };

    let balancer = &state.balancer;
    let outcome = match target.deadline {
        Some(within) => {
            balancer
                .execute_with_deadline(
                    target.request_type,
                    target.priority,
                    Instant::now() + within,
                    operation,
                )
                .await
        }
        None => {
            balancer
                .execute_with_retry(target.request_type, target.priority, operation)
                .await
        }
    };

    Ok(match outcome {
        Ok((url, ForwardedResponse { status, body })) => Response::builder()
            .status(status)
            .header(NODE_URL_HEADER, url)
            .body(Full::new(body))
            .unwrap_or_else(|_| error_response(StatusCode::BAD_GATEWAY, "invalid node response")),
        Err(err) => execute_error_response(&err),
    })
}

fn execute_error_response(err: &ExecuteError<ForwardError>) -> Response<Full<Bytes>> {
    let status = match err {
        ExecuteError::Route(RouteError::NoCompatibleService(_)) => StatusCode::BAD_REQUEST,
        ExecuteError::Route(RouteError::NoAvailableNode(_)) => StatusCode::SERVICE_UNAVAILABLE,
        ExecuteError::AllRetriesExhausted { .. } => StatusCode::BAD_GATEWAY,
        ExecuteError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
    };
    error_response(status, &err.to_string())
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| plain(StatusCode::INTERNAL_SERVER_ERROR, "response build failed")),
        Err(err) => plain(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json(status, &ErrorBody { error: message })
}

fn plain(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dispatch_defaults() {
        let target = parse_dispatch("/dispatch/image_analysis", None).unwrap();
        assert_eq!(
            target,
            DispatchTarget {
                request_type: RequestType::ImageAnalysis,
                backend_path: "/".into(),
                priority: Priority::Medium,
                deadline: None,
            }
        );
    }

    #[test]
    fn test_parse_dispatch_tail_and_query() {
        let target = parse_dispatch(
            "/dispatch/geo_spatial/v1/tiles",
            Some("priority=critical&deadline_ms=2500&x=1&zoom=4"),
        )
        .unwrap();
        assert_eq!(target.request_type, RequestType::GeoSpatial);
        assert_eq!(target.backend_path, "/v1/tiles?x=1&zoom=4");
        assert_eq!(target.priority, Priority::Critical);
        assert_eq!(target.deadline, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_parse_dispatch_unknown_priority_is_medium() {
        let target = parse_dispatch("/dispatch/batch_processing", Some("priority=urgent")).unwrap();
        assert_eq!(target.priority, Priority::Medium);
    }

    #[test]
    fn test_parse_dispatch_rejects_bad_input() {
        assert!(parse_dispatch("/dispatch/teleport", None).is_err());
        assert!(parse_dispatch("/dispatch/image_analysis", Some("deadline_ms=soon")).is_err());
    }

    #[test]
    fn test_error_status_mapping() {
        let unroutable: ExecuteError<ForwardError> =
            RouteError::NoAvailableNode(RequestType::ImageAnalysis).into();
        assert_eq!(
            execute_error_response(&unroutable).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        let exhausted = ExecuteError::AllRetriesExhausted {
            attempts: 3,
            last_error: ForwardError::Status(StatusCode::INTERNAL_SERVER_ERROR),
        };
        assert_eq!(
            execute_error_response(&exhausted).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
