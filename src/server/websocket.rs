//! WebSocket upgrade and session loop
//!
//! One task per connection reads frames in order and hands them to the
//! relay; a second task drains the session's outbound buffer into the
//! socket. The session lives in the registry from handshake until the read
//! loop ends, whatever ends it.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::relay::{PeerMessage, Pool, Relay, Routed, ServerMessage, SessionHandle, SessionId};
use crate::routes;
use crate::server::http::AppState;

/// WebSocket type after upgrade
type HyperWebSocket =
    hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

/// How long a closing session waits for its writer to flush
const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Handle WebSocket upgrade for a producer or requester
pub async fn handle_upgrade(
    state: Arc<AppState>,
    req: Request<Incoming>,
    pool: Pool,
    addr: SocketAddr,
) -> Response<Full<Bytes>> {
    match hyper_tungstenite::upgrade(req, None) {
        Ok((response, websocket)) => {
            let relay = Arc::clone(&state.relay);
            let buffer = state.args.outbound_buffer;

            tokio::spawn(async move {
                match websocket.await {
                    Ok(ws) => run_session(relay, ws, pool, addr, buffer).await,
                    Err(e) => warn!("WebSocket handshake with {} failed: {}", addr, e),
                }
            });

            let (parts, _) = response.into_parts();
            Response::from_parts(parts, Full::new(Bytes::new()))
        }
        Err(e) => {
            warn!("WebSocket upgrade error from {}: {:?}", addr, e);
            routes::error_response(
                StatusCode::BAD_REQUEST,
                &format!("WebSocket upgrade failed: {e}"),
            )
        }
    }
}

fn established(pool: Pool, id: &SessionId) -> ServerMessage {
    match pool {
        Pool::Producer => ServerMessage::ConnectionEstablished {
            session_id: Some(id.clone()),
            client_id: None,
        },
        Pool::Requester => ServerMessage::ConnectionEstablished {
            session_id: None,
            client_id: Some(id.clone()),
        },
    }
}

/// Give a session's writer `grace` to flush, then abort it
///
/// A writer parked on a peer that stopped reading never finishes on its own.
async fn finish_writer(mut writer: JoinHandle<()>, grace: Duration, id: &SessionId) {
    if tokio::time::timeout(grace, &mut writer).await.is_err() {
        debug!("Writer for {} did not finish in time, aborting", id);
        writer.abort();
    }
}

/// Run one registered session until its transport closes
async fn run_session(
    relay: Arc<Relay>,
    ws: HyperWebSocket,
    pool: Pool,
    addr: SocketAddr,
    buffer: usize,
) {
    let (mut sink, mut stream) = ws.split();
    let (handle, mut outbound) = SessionHandle::channel(buffer);
    let id = relay.registry().register(pool, handle);

    info!("New {} connection: {} ({})", pool, id, addr);

    let writer_id = id.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if let Err(e) = sink.send(msg).await {
                debug!("Write to {} failed: {}", writer_id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    if let Err(reason) = relay.deliver_message(pool, &id, &established(pool, &id)) {
        warn!("Could not announce session {}: {:?}", id, reason);
    }

    while let Some(next) = stream.next().await {
        let frame = match next {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{} {} read error: {}", pool, id, e);
                break;
            }
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    warn!("{} {} sent a non UTF-8 binary frame, closing", pool, id);
                    break;
                }
            },
            Message::Close(_) => break,
            _ => continue,
        };

        let msg = match PeerMessage::parse(&text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Malformed frame from {} {}, closing: {}", pool, id, e);
                break;
            }
        };

        debug!("{} {} sent {}", pool, id, msg.kind());
        match relay.forward(pool, &id, msg) {
            Routed::Forwarded { to } => debug!("Forwarded output from {} to {}", id, to),
            Routed::Submitted(Ok(receipt)) => {
                debug!("Requester {} submitted task {}", id, receipt.task_id)
            }
            Routed::Submitted(Err(e)) => debug!("Requester {} submission refused: {}", id, e),
            Routed::Dropped(_) => {}
        }
    }

    // The registry held the other sender; once it is gone the writer drains and closes
    relay.registry().remove(pool, &id);
    finish_writer(writer, WRITER_SHUTDOWN_GRACE, &id).await;

    info!("{} connection closed: {}", pool, id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_stuck_writer_is_aborted() {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let writer = tokio::spawn(async move {
            let _held = tx;
            std::future::pending::<()>().await;
        });

        finish_writer(writer, Duration::from_millis(50), &SessionId::from("stuck")).await;

        // The task's state is dropped once aborted
        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert_eq!(closed, Ok(None));
    }

    #[tokio::test]
    async fn test_finished_writer_is_awaited() {
        let (tx, mut rx) = mpsc::channel::<u8>(1);
        let writer = tokio::spawn(async move {
            let _ = tx.send(7).await;
        });

        finish_writer(writer, Duration::from_secs(1), &SessionId::from("done")).await;

        assert_eq!(rx.recv().await, Some(7));
    }
}
