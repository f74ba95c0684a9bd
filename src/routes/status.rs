//! Status endpoint
//!
//! Reports how many sessions each pool currently holds.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::json_response;
use crate::relay::Pool;
use crate::server::AppState;

/// Body of `GET /api/status`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub producer_connections: usize,
    pub requester_connections: usize,
}

pub fn status_check(state: &AppState) -> Response<Full<Bytes>> {
    let registry = state.relay.registry();
    let response = StatusResponse {
        status: "ok",
        producer_connections: registry.size(Pool::Producer),
        requester_connections: registry.size(Pool::Requester),
    };
    json_response(StatusCode::OK, &response)
}
