//! prompt-relay - WebSocket relay between prompt producers and requesters
//!
//! Producers (agents able to run a prompt against an LLM service and stream
//! the answer) and requesters (clients that want that answer) cannot reach
//! each other directly. Both connect here; the relay broadcasts submitted
//! prompts to every producer and forwards each output fragment to the
//! requester named by its `clientId`.
//!
//! ## Services
//!
//! - **Sessions**: `/ws` for producers, `/ws/client` for requesters
//! - **Submission**: `POST /api/send-prompt`
//! - **Status**: `GET /api/status`, `GET /health`
//! - **Peers**: reconnecting client library and HTTP submission client

pub mod client;
pub mod config;
pub mod relay;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, serve, AppState};
pub use types::{RelayError, Result};
