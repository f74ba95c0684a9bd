//! Relay wire protocol
//!
//! Every frame is a JSON text message with a `type` discriminator.
//!
//! Server -> peer:
//! - `connection_established` - assigned id (`sessionId` for producers, `clientId` for requesters)
//! - `inject_prompt` - task dispatched to every producer
//! - `response_chunk` - producer output forwarded to the requester
//! - `submit_accepted` - reply to a requester's `submit_prompt`
//! - `error` - reply to a failed `submit_prompt`
//!
//! Peer -> server:
//! - `llm_response` - output fragment from a producer, keyed by `clientId`
//! - `submit_prompt` - task submission from a requester over its own socket
//!
//! ## Example
//!
//! ```json
//! {"type": "inject_prompt", "taskId": "6b0e...", "userPrompt": "What is the capital of France?",
//!  "systemPrompt": null, "targetService": "chatgpt", "clientId": "1700000000000-4"}
//! {"type": "llm_response", "clientId": "1700000000000-4", "text": "Paris", "done": true}
//! {"type": "response_chunk", "text": "Paris", "done": true}
//! ```

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

use super::SessionId;

/// Task handed to producers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDispatch {
    pub task_id: String,
    pub user_prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Which service the producer should drive (e.g. "chatgpt", "claude")
    pub target_service: String,
    /// Correlation id: the requester session that receives the output
    #[serde(default)]
    pub client_id: Option<SessionId>,
}

/// Message sent from the relay to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    ConnectionEstablished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<SessionId>,
    },
    InjectPrompt(TaskDispatch),
    ResponseChunk {
        text: String,
        done: bool,
    },
    SubmitAccepted {
        task_id: String,
        client_id: SessionId,
        producers: usize,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// Encode as a WebSocket text frame
    pub fn to_frame(&self) -> Result<Message, serde_json::Error> {
        serde_json::to_string(self).map(Message::Text)
    }

    /// Decode a text frame received by a peer
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Message sent from a peer to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PeerMessage {
    /// Output fragment from a producer
    LlmResponse {
        #[serde(default)]
        client_id: Option<SessionId>,
        text: String,
        done: bool,
    },
    /// Submission from a requester; its own session id becomes the correlation id
    SubmitPrompt {
        user_prompt: String,
        #[serde(default)]
        system_prompt: Option<String>,
        target_service: String,
    },
}

impl PeerMessage {
    /// Wire name of the message type, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LlmResponse { .. } => "llm_response",
            Self::SubmitPrompt { .. } => "submit_prompt",
        }
    }

    /// Decode a frame received by the relay
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode as a WebSocket text frame
    pub fn to_frame(&self) -> Result<Message, serde_json::Error> {
        serde_json::to_string(self).map(Message::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_established_producer_shape() {
        let msg = ServerMessage::ConnectionEstablished {
            session_id: Some("1-0".into()),
            client_id: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "connection_established", "sessionId": "1-0"}));
    }

    #[test]
    fn test_inject_prompt_field_names() {
        let msg = ServerMessage::InjectPrompt(TaskDispatch {
            task_id: "t1".into(),
            user_prompt: "What is the capital of France?".into(),
            system_prompt: None,
            target_service: "chatgpt".into(),
            client_id: Some("42".into()),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "inject_prompt");
        assert_eq!(value["taskId"], "t1");
        assert_eq!(value["userPrompt"], "What is the capital of France?");
        assert_eq!(value["targetService"], "chatgpt");
        assert_eq!(value["clientId"], "42");
        assert!(value["systemPrompt"].is_null());
    }

    #[test]
    fn test_parse_llm_response() {
        let msg =
            PeerMessage::parse(r#"{"type":"llm_response","clientId":"42","text":"Paris","done":true}"#)
                .unwrap();
        assert_eq!(
            msg,
            PeerMessage::LlmResponse {
                client_id: Some("42".into()),
                text: "Paris".into(),
                done: true,
            }
        );
    }

    #[test]
    fn test_llm_response_without_client_id() {
        let msg =
            PeerMessage::parse(r#"{"type":"llm_response","text":"partial","done":false}"#)
                .unwrap();
        assert!(matches!(
            msg,
            PeerMessage::LlmResponse { client_id: None, done: false, .. }
        ));
    }

    #[test]
    fn test_llm_response_requires_text_and_done() {
        assert!(PeerMessage::parse(r#"{"type":"llm_response","clientId":"42"}"#).is_err());
        assert!(
            PeerMessage::parse(r#"{"type":"llm_response","clientId":"42","text":"Paris"}"#)
                .is_err()
        );
        assert!(
            PeerMessage::parse(r#"{"type":"llm_response","clientId":"42","done":true}"#).is_err()
        );
    }

    #[test]
    fn test_rejects_unknown_type_and_garbage() {
        assert!(PeerMessage::parse(r#"{"type":"teleport"}"#).is_err());
        assert!(PeerMessage::parse("not json").is_err());
    }

    #[test]
    fn test_response_chunk_frame() {
        let frame = ServerMessage::ResponseChunk { text: "Par".into(), done: false }
            .to_frame()
            .unwrap();
        match frame {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value, json!({"type": "response_chunk", "text": "Par", "done": false}));
            }
            other => panic!("expected text frame, got {:?}", other),
        }
    }
}
