//! Peer-side library
//!
//! - `PeerConnection`: reconnecting WebSocket session as producer or requester
//! - `SubmitClient`: HTTP submission and status
//! - `echo`: trivial producer behaviour used by the `echo-producer` binary

pub mod echo;
pub mod peer;
pub mod submit;

pub use peer::{PeerConfig, PeerConnection, PeerState, ReconnectPolicy};
pub use submit::{RelayStatus, SubmitClient, SubmitResponse};
