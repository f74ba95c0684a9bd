//! Task submission
//!
//! A submission is broadcast to every producer registered at the moment of
//! the call. There is no producer selection and no task queue: with no
//! producers the submission fails and nothing is sent.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::protocol::{ServerMessage, TaskDispatch};
use super::{DeliveryError, Pool, Relay, SessionId};
use crate::types::{RelayError, Result};

/// Body of `POST /api/send-prompt`
///
/// Fields are optional at the type level so that a missing field is reported
/// as a validation error rather than a JSON error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_service: Option<String>,
    /// Requester session that should receive the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<SessionId>,
}

/// Outcome of a successful broadcast
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitReceipt {
    pub task_id: String,
    pub client_id: Option<SessionId>,
    /// Producers the dispatch was queued for
    pub producers: usize,
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.trim().is_empty())
}

impl Relay {
    /// Broadcast a task to every connected producer
    pub fn submit(&self, request: PromptRequest) -> Result<SubmitReceipt> {
        let (Some(user_prompt), Some(target_service)) = (
            required(request.user_prompt),
            required(request.target_service),
        ) else {
            return Err(RelayError::BadRequest("Missing required fields".into()));
        };

        let producers = self.registry().snapshot(Pool::Producer);
        if producers.is_empty() {
            return Err(RelayError::NoProducersConnected);
        }

        let dispatch = TaskDispatch {
            task_id: Uuid::new_v4().to_string(),
            user_prompt,
            system_prompt: request.system_prompt,
            target_service,
            client_id: request.client_id,
        };
        let frame = ServerMessage::InjectPrompt(dispatch.clone())
            .to_frame()
            .map_err(|e| RelayError::Internal(format!("Failed to encode dispatch: {}", e)))?;

        let mut reached = 0;
        for (id, handle) in producers {
            match handle.send(frame.clone()) {
                Ok(()) => reached += 1,
                Err(DeliveryError::Closed) => {
                    warn!("Dispatch {}: producer {} is gone, removing", dispatch.task_id, id);
                    self.registry().remove(Pool::Producer, &id);
                }
                Err(e) => {
                    warn!("Dispatch {}: producer {} skipped: {}", dispatch.task_id, id, e);
                }
            }
        }

        if reached == 0 {
            return Err(RelayError::NoProducersConnected);
        }

        info!(
            task_id = %dispatch.task_id,
            client_id = ?dispatch.client_id,
            target_service = %dispatch.target_service,
            producers = reached,
            "Task dispatched"
        );

        Ok(SubmitReceipt {
            task_id: dispatch.task_id,
            client_id: dispatch.client_id,
            producers: reached,
        })
    }
}
