//! Relay core: session registry, correlation and forwarding
//!
//! Producers connect on `/ws`, requesters on `/ws/client`. Each gets a
//! session id on connect. A submission is broadcast to every producer with
//! the requester's id as `clientId`; producer output carrying that `clientId`
//! is re-wrapped and forwarded to the requester.
//!
//! Delivery is best-effort and at-most-once. Nothing is queued for absent
//! peers and nothing is retried.

mod forward;
pub mod protocol;
mod registry;
mod session_id;
mod submit;

pub use forward::{DropReason, Routed};
pub use protocol::{PeerMessage, ServerMessage, TaskDispatch};
pub use registry::{DeliveryError, Pool, Registry, SessionHandle};
pub use session_id::{IdGenerator, SessionId};
pub use submit::{PromptRequest, SubmitReceipt};

/// Forwarding engine and submission entry point over one registry
#[derive(Debug, Default)]
pub struct Relay {
    registry: Registry,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
