//! Session registry
//!
//! Two independent pools of live connections (producers and requesters),
//! each indexed by session id. Thread-safe lookup for message forwarding.
//!
//! Entries are only ever added by `register` and taken out by `remove`.

use dashmap::DashMap;
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::session_id::{IdGenerator, SessionId};

/// Which side of the relay a session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pool {
    /// Peers that execute tasks and stream output back
    Producer,
    /// Peers that submit tasks and consume output
    Requester,
}

impl Pool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Requester => "requester",
        }
    }

    /// WebSocket path peers of this pool connect on
    pub fn path(&self) -> &'static str {
        match self {
            Self::Producer => "/ws",
            Self::Requester => "/ws/client",
        }
    }

    /// Classify an upgrade path; anything else is rejected
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/ws" => Some(Self::Producer),
            "/ws/client" => Some(Self::Requester),
            _ => None,
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a frame could not be handed to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The session's writer is gone (transport closed or broken)
    #[error("destination connection closed")]
    Closed,
    /// The session is alive but not draining its outbound buffer
    #[error("destination outbound buffer full")]
    Backpressure,
}

/// Sending half of one session's outbound buffer
///
/// Sends never wait: a slow peer only fills its own buffer.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Message>,
}

impl SessionHandle {
    /// Create a handle and the receiver its writer task drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a frame for this session
    pub fn send(&self, msg: Message) -> Result<(), DeliveryError> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Closed(_) => DeliveryError::Closed,
            TrySendError::Full(_) => DeliveryError::Backpressure,
        })
    }
}

/// Registry of live sessions in both pools
#[derive(Debug, Default)]
pub struct Registry {
    producers: DashMap<SessionId, SessionHandle>,
    requesters: DashMap<SessionId, SessionHandle>,
    ids: IdGenerator,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self, pool: Pool) -> &DashMap<SessionId, SessionHandle> {
        match pool {
            Pool::Producer => &self.producers,
            Pool::Requester => &self.requesters,
        }
    }

    /// Register a session under a fresh id
    pub fn register(&self, pool: Pool, handle: SessionHandle) -> SessionId {
        let id = self.ids.next_id();
        self.pool(pool).insert(id.clone(), handle);
        debug!("Registry: registered {} {}, count={}", pool, id, self.size(pool));
        id
    }

    /// Get the handle of a session
    pub fn lookup(&self, pool: Pool, id: &SessionId) -> Option<SessionHandle> {
        self.pool(pool).get(id).map(|entry| entry.value().clone())
    }

    /// Remove a session; returns false if it was not registered
    pub fn remove(&self, pool: Pool, id: &SessionId) -> bool {
        let removed = self.pool(pool).remove(id).is_some();
        if removed {
            debug!("Registry: removed {} {}, count={}", pool, id, self.size(pool));
        }
        removed
    }

    /// Number of sessions currently registered in a pool
    pub fn size(&self, pool: Pool) -> usize {
        self.pool(pool).len()
    }

    /// Copy of every session in a pool, taken before any send happens
    pub fn snapshot(&self, pool: Pool) -> Vec<(SessionId, SessionHandle)> {
        self.pool(pool)
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
