//! Health check endpoints
//!
//! - /health, /healthz - Liveness probe (is the relay running?)
//! - /version - Build version

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::json_response;
use crate::server::AppState;

/// Liveness response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Seconds since the relay started
    pub uptime: u64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    version: &'static str,
    service: &'static str,
}

/// Liveness probe - always 200 while the process serves requests
pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let response = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    json_response(StatusCode::OK, &response)
}

pub fn version_info() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &VersionResponse {
            version: env!("CARGO_PKG_VERSION"),
            service: env!("CARGO_PKG_NAME"),
        },
    )
}
