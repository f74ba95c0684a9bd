//! Relay peer connection
//!
//! Maintains a WebSocket session with the relay as a producer or requester.
//! Reconnects with exponential backoff when the session drops.
//!
//! State machine:
//!
//! ```text
//! Disconnected --(attempt)--> Connecting --(connection_established)--> Connected
//!      ^                          |                                        |
//!      +------(connect failed)----+--------------(closed / error)----------+
//! ```
//!
//! Each `Disconnected -> Connecting` transition after the first waits for the
//! current backoff delay. The delay resets once a connection succeeds.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_PORT;
use crate::relay::{PeerMessage, Pool, ServerMessage, SessionId};
use crate::types::{RelayError, Result};

/// Connection state of a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    Disconnected,
    Connecting,
    /// Session announced by the relay
    Connected { session_id: SessionId },
}

/// Backoff between reconnection attempts
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// Delay to use after waiting `current`
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }
}

/// Peer connection configuration
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Full WebSocket URL, including the pool path
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// Messages buffered in each direction
    pub buffer: usize,
}

impl PeerConfig {
    /// Configuration for a pool, given the relay base URL (e.g. `ws://localhost:3000`)
    pub fn for_pool(base_url: &str, pool: Pool) -> Self {
        Self {
            url: format!("{}{}", base_url.trim_end_matches('/'), pool.path()),
            reconnect: ReconnectPolicy::default(),
            buffer: 64,
        }
    }

    pub fn producer(base_url: &str) -> Self {
        Self::for_pool(base_url, Pool::Producer)
    }

    pub fn requester(base_url: &str) -> Self {
        Self::for_pool(base_url, Pool::Requester)
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self::producer(&format!("ws://localhost:{}", DEFAULT_PORT))
    }
}

/// Live peer: state, inbound messages and an outbound queue
pub struct PeerConnection {
    state: watch::Receiver<PeerState>,
    outbound: mpsc::Sender<PeerMessage>,
    inbound: mpsc::Receiver<ServerMessage>,
    task: JoinHandle<()>,
}

impl PeerConnection {
    /// Start connecting in the background
    pub fn spawn(config: PeerConfig) -> Self {
        let (state_tx, state) = watch::channel(PeerState::Disconnected);
        let (outbound, outbound_rx) = mpsc::channel(config.buffer);
        let (inbound_tx, inbound) = mpsc::channel(config.buffer);

        let task = tokio::spawn(connection_loop(config, state_tx, outbound_rx, inbound_tx));

        Self {
            state,
            outbound,
            inbound,
            task,
        }
    }

    /// Current state
    pub fn state(&self) -> PeerState {
        self.state.borrow().clone()
    }

    /// Wait until the relay has announced a session
    pub async fn wait_connected(&self) -> Result<SessionId> {
        let mut state = self.state.clone();
        loop {
            if let PeerState::Connected { session_id } = &*state.borrow_and_update() {
                return Ok(session_id.clone());
            }
            state
                .changed()
                .await
                .map_err(|_| RelayError::WebSocket("Peer task ended".into()))?;
        }
    }

    /// Send a message on the current session
    ///
    /// Fails instead of queueing when no session is up, so nothing written
    /// during an outage is replayed on the next session.
    pub async fn send(&self, msg: PeerMessage) -> Result<()> {
        if !matches!(*self.state.borrow(), PeerState::Connected { .. }) {
            return Err(RelayError::WebSocket("Not connected to relay".into()));
        }
        self.outbound
            .send(msg)
            .await
            .map_err(|_| RelayError::WebSocket("Peer task ended".into()))
    }

    /// Next message from the relay, across reconnects
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.inbound.recv().await
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Why a session ended
enum SessionEnd {
    /// Transport closed or failed; reconnect
    Closed,
    /// The owning `PeerConnection` is gone; stop
    Abandoned,
}

/// Main connection loop with reconnection logic
async fn connection_loop(
    config: PeerConfig,
    state: watch::Sender<PeerState>,
    mut outbound: mpsc::Receiver<PeerMessage>,
    inbound: mpsc::Sender<ServerMessage>,
) {
    let mut delay = config.reconnect.initial_delay;

    loop {
        let _ = state.send(PeerState::Connecting);
        info!("Connecting to relay at {}", config.url);

        match connect_async(config.url.as_str()).await {
            Ok((ws, _)) => {
                delay = config.reconnect.initial_delay;
                match run_session(ws, &state, &mut outbound, &inbound).await {
                    SessionEnd::Closed => info!("Relay session at {} ended", config.url),
                    SessionEnd::Abandoned => {
                        let _ = state.send(PeerState::Disconnected);
                        return;
                    }
                }
            }
            Err(e) => warn!("Failed to connect to relay at {}: {}", config.url, e),
        }

        let _ = state.send(PeerState::Disconnected);
        if inbound.is_closed() {
            return;
        }

        warn!("Reconnecting to relay in {:?}...", delay);
        tokio::time::sleep(delay).await;
        delay = config.reconnect.next_delay(delay);
    }
}

async fn run_session<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    state: &watch::Sender<PeerState>,
    outbound: &mut mpsc::Receiver<PeerMessage>,
    inbound: &mpsc::Sender<ServerMessage>,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    // Anything queued before this session belongs to a previous one
    while outbound.try_recv().is_ok() {}

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Closed,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("Relay read error: {}", e);
                        return SessionEnd::Closed;
                    }
                };

                let msg = match ServerMessage::parse(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Unparseable frame from relay: {}", e);
                        continue;
                    }
                };

                if let ServerMessage::ConnectionEstablished { session_id, client_id } = &msg {
                    if let Some(id) = session_id.as_ref().or(client_id.as_ref()) {
                        debug!("Session established: {}", id);
                        let _ = state.send(PeerState::Connected { session_id: id.clone() });
                    }
                }

                if inbound.send(msg).await.is_err() {
                    let _ = sink.close().await;
                    return SessionEnd::Abandoned;
                }
            }

            queued = outbound.recv() => {
                let Some(msg) = queued else {
                    let _ = sink.close().await;
                    return SessionEnd::Abandoned;
                };
                let frame = match msg.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Failed to encode {}: {}", msg.kind(), e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(frame).await {
                    warn!("Relay write error: {}", e);
                    return SessionEnd::Closed;
                }
            }
        }
    }
}
