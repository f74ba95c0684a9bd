//! Prompt submission endpoint
//!
//! `POST /api/send-prompt` broadcasts a prompt to every connected producer.
//!
//! ```json
//! // Request
//! {"userPrompt": "What is the capital of France?", "systemPrompt": "You are a helpful assistant.",
//!  "targetService": "chatgpt", "clientId": "1700000000000-4"}
//!
//! // 200
//! {"success": true, "message": "Prompt sent to producers", "clientId": "1700000000000-4",
//!  "taskId": "6b0e...", "producers": 2}
//!
//! // 503
//! {"error": "No active producers connected"}
//! ```

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{error_response, json_response};
use crate::relay::{PromptRequest, SessionId};
use crate::server::AppState;
use crate::types::RelayError;

/// Successful submission reply
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPromptResponse {
    pub success: bool,
    pub message: &'static str,
    pub client_id: Option<SessionId>,
    pub task_id: String,
    pub producers: usize,
}

/// Handle `POST /api/send-prompt`
pub async fn handle_send_prompt(req: Request<Incoming>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    let body = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Send prompt request body error: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "Failed to read request body");
        }
    };

    let request: PromptRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            debug!("Send prompt JSON parse error: {}", e);
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid JSON: {}", e));
        }
    };

    match state.relay.submit(request) {
        Ok(receipt) => json_response(
            StatusCode::OK,
            &SendPromptResponse {
                success: true,
                message: "Prompt sent to producers",
                client_id: receipt.client_id,
                task_id: receipt.task_id,
                producers: receipt.producers,
            },
        ),
        Err(RelayError::BadRequest(message)) => error_response(StatusCode::BAD_REQUEST, &message),
        Err(e) => {
            let (status, body) = e.into_status_code_and_body();
            error_response(status, &body)
        }
    }
}
