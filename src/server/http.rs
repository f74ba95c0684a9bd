//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. WebSocket upgrades on
//! `/ws` and `/ws/client` are handed to the session loop; everything else is
//! the JSON API.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::relay::{Pool, Relay};
use crate::routes;
use crate::server::websocket;
use crate::types::{RelayError, Result};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Session registry plus forwarding and submission
    pub relay: Arc<Relay>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args) -> Self {
        Self {
            args,
            relay: Arc::new(Relay::new()),
            started_at: Instant::now(),
        }
    }
}

/// Bind the configured address and serve until the process exits
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let addr = state.args.listen_addr().map_err(RelayError::Config)?;
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state).await
}

/// Serve connections from an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let local = listener.local_addr()?;
    info!("Relay listening on {}", local);
    info!("Producer WebSocket URL: ws://{}{}", local, Pool::Producer.path());
    info!("Requester WebSocket URL: ws://{}{}", local, Pool::Requester.path());
    info!("HTTP API endpoint: http://{}/api/send-prompt", local);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let is_upgrade = hyper_tungstenite::is_upgrade_request(&req);

    debug!("[{}] {} {}", addr, method, path);

    // Peer sessions
    if let Some(pool) = Pool::from_path(&path) {
        if method == Method::GET && is_upgrade {
            return Ok(to_boxed(websocket::handle_upgrade(state, req, pool, addr).await));
        }
        if method == Method::GET {
            return Ok(to_boxed(routes::error_response(
                StatusCode::BAD_REQUEST,
                &format!("WebSocket upgrade required for {}", path),
            )));
        }
    }

    // Upgrades anywhere else never get a handshake
    if is_upgrade {
        warn!("[{}] rejecting WebSocket upgrade on {}", addr, path);
        return Ok(to_boxed(rejected_upgrade_response(&path)));
    }

    let response = match (method, path.as_str()) {
        (Method::POST, "/api/send-prompt") => {
            routes::handle_send_prompt(req, Arc::clone(&state)).await
        }

        (Method::GET, "/api/status") => routes::status_check(&state),

        // Liveness probe - returns 200 if the relay is running
        (Method::GET, "/health") | (Method::GET, "/healthz") => routes::health_check(&state),

        (Method::GET, "/version") => routes::version_info(),

        // CORS preflight
        (Method::OPTIONS, _) => preflight_response(),

        _ => not_found_response(&path),
    };

    Ok(to_boxed(response))
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = routes::json_response(StatusCode::OK, &json!({}));
    let headers = response.headers_mut();
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_HEADERS,
        hyper::header::HeaderValue::from_static("*"),
    );
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_METHODS,
        hyper::header::HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    response
}

/// 404 for an upgrade on an unknown path; the connection is not kept alive
fn rejected_upgrade_response(path: &str) -> Response<Full<Bytes>> {
    let mut response = not_found_response(path);
    response.headers_mut().insert(
        hyper::header::CONNECTION,
        hyper::header::HeaderValue::from_static("close"),
    );
    response
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    routes::json_response(
        StatusCode::NOT_FOUND,
        &json!({
            "error": "Not Found",
            "path": path,
            "hint": "Producers connect to /ws, requesters to /ws/client"
        }),
    )
}
