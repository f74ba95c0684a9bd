//! HTTP submission client
//!
//! Thin wrapper over the relay's JSON API for callers that do not hold a
//! WebSocket session themselves.

use reqwest::StatusCode;
use serde::Deserialize;

use crate::relay::{PromptRequest, SessionId};
use crate::types::{RelayError, Result};

/// Reply to an accepted submission
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub client_id: Option<SessionId>,
    pub task_id: String,
    pub producers: usize,
}

/// Reply to `GET /api/status`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub status: String,
    pub producer_connections: usize,
    pub requester_connections: usize,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

/// Client for the relay HTTP API
#[derive(Debug, Clone)]
pub struct SubmitClient {
    http: reqwest::Client,
    base_url: String,
}

impl SubmitClient {
    /// `base_url` is the relay's HTTP origin, e.g. `http://localhost:3000`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Submit a prompt for broadcast to every producer
    pub async fn send_prompt(&self, request: &PromptRequest) -> Result<SubmitResponse> {
        let response = self
            .http
            .post(format!("{}/api/send-prompt", self.base_url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        Err(match status {
            StatusCode::SERVICE_UNAVAILABLE => RelayError::NoProducersConnected,
            StatusCode::BAD_REQUEST => RelayError::BadRequest(body.error),
            other => RelayError::Http(format!("{}: {}", other, body.error)),
        })
    }

    /// Fetch session counts
    pub async fn status(&self) -> Result<RelayStatus> {
        let response = self
            .http
            .get(format!("{}/api/status", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}
