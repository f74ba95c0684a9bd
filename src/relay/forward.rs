//! Message forwarding
//!
//! Routes one inbound peer message to its destination in the other pool.
//! Misses are dropped and reported to the caller for logging; the sending
//! peer never hears about them.

use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::protocol::{PeerMessage, ServerMessage};
use super::submit::{PromptRequest, SubmitReceipt};
use super::{DeliveryError, Pool, Relay, SessionId};
use crate::types::RelayError;

/// What happened to an inbound message
#[derive(Debug)]
pub enum Routed {
    /// Output re-wrapped and queued for the requester
    Forwarded { to: SessionId },
    /// A requester's submission ran; the outcome was sent back to it
    Submitted(Result<SubmitReceipt, RelayError>),
    /// Nothing was delivered
    Dropped(DropReason),
}

/// Why a message was not delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Output without a `clientId`
    MissingCorrelationId,
    /// No session with this id in the destination pool
    UnknownSession(SessionId),
    /// Session found but the send failed
    Unreachable(SessionId, DeliveryError),
    /// Message kind not accepted from this pool
    WrongPool { from: Pool, kind: &'static str },
    /// Frame could not be encoded
    Encode(String),
}

impl Relay {
    /// Route a message received from session `from_id` in pool `from`
    pub fn forward(&self, from: Pool, from_id: &SessionId, msg: PeerMessage) -> Routed {
        match (from, msg) {
            (Pool::Producer, PeerMessage::LlmResponse { client_id, text, done }) => {
                let Some(client_id) = client_id else {
                    debug!("Output from producer {} has no clientId, dropping", from_id);
                    return Routed::Dropped(DropReason::MissingCorrelationId);
                };

                match self.deliver_message(
                    Pool::Requester,
                    &client_id,
                    &ServerMessage::ResponseChunk { text, done },
                ) {
                    Ok(()) => Routed::Forwarded { to: client_id },
                    Err(reason) => {
                        debug!(
                            "Output from producer {} for {} dropped: {:?}",
                            from_id, client_id, reason
                        );
                        Routed::Dropped(reason)
                    }
                }
            }

            (
                Pool::Requester,
                PeerMessage::SubmitPrompt {
                    user_prompt,
                    system_prompt,
                    target_service,
                },
            ) => {
                let result = self.submit(PromptRequest {
                    user_prompt: Some(user_prompt),
                    system_prompt,
                    target_service: Some(target_service),
                    client_id: Some(from_id.clone()),
                });

                let reply = match &result {
                    Ok(receipt) => ServerMessage::SubmitAccepted {
                        task_id: receipt.task_id.clone(),
                        client_id: from_id.clone(),
                        producers: receipt.producers,
                    },
                    Err(e) => ServerMessage::Error {
                        message: e.to_string(),
                    },
                };
                if let Err(reason) = self.deliver_message(Pool::Requester, from_id, &reply) {
                    debug!("Submit reply to {} dropped: {:?}", from_id, reason);
                }

                Routed::Submitted(result)
            }

            (from, msg) => {
                warn!(
                    "{} {} sent {}, which is not accepted from that pool",
                    from,
                    from_id,
                    msg.kind()
                );
                Routed::Dropped(DropReason::WrongPool {
                    from,
                    kind: msg.kind(),
                })
            }
        }
    }

    /// Encode and deliver a message to one session
    pub fn deliver_message(
        &self,
        pool: Pool,
        id: &SessionId,
        msg: &ServerMessage,
    ) -> Result<(), DropReason> {
        let frame = msg
            .to_frame()
            .map_err(|e| DropReason::Encode(e.to_string()))?;
        self.deliver(pool, id, frame)
    }

    /// Deliver a frame to one session
    ///
    /// A session whose transport is gone is removed from the registry.
    pub fn deliver(&self, pool: Pool, id: &SessionId, frame: Message) -> Result<(), DropReason> {
        let handle = self
            .registry()
            .lookup(pool, id)
            .ok_or_else(|| DropReason::UnknownSession(id.clone()))?;

        match handle.send(frame) {
            Ok(()) => Ok(()),
            Err(DeliveryError::Closed) => {
                self.registry().remove(pool, id);
                Err(DropReason::Unreachable(id.clone(), DeliveryError::Closed))
            }
            Err(e) => Err(DropReason::Unreachable(id.clone(), e)),
        }
    }
}
