//! End-to-end relay tests
//!
//! Starts the real server on an ephemeral port and drives it with raw
//! WebSocket peers, the peer library and the HTTP submission client.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use prompt_relay::client::{echo::echo_fragments, PeerConfig, PeerConnection, SubmitClient};
use prompt_relay::relay::{PromptRequest, ServerMessage};
use prompt_relay::{serve, AppState, Args, RelayError};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STEP: Duration = Duration::from_secs(5);

async fn start_relay() -> SocketAddr {
    let args = Args::parse_from(["prompt-relay", "--host", "127.0.0.1", "--port", "0"]);
    let state = Arc::new(AppState::new(args));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = serve(listener, state).await;
    });
    addr
}

async fn next_json(ws: &mut Ws) -> Value {
    timeout(STEP, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended while waiting for a frame: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

/// Connect to a pool path and return the socket plus the announced id
async fn connect(addr: SocketAddr, path: &str) -> (Ws, String) {
    let (mut ws, _) = connect_async(format!("ws://{}{}", addr, path)).await.unwrap();
    let hello = next_json(&mut ws).await;
    assert_eq!(hello["type"], "connection_established");
    let id = hello["sessionId"]
        .as_str()
        .or_else(|| hello["clientId"].as_str())
        .expect("session id")
        .to_string();
    (ws, id)
}

async fn assert_silent(ws: &mut Ws) {
    let got = timeout(Duration::from_millis(250), ws.next()).await;
    assert!(got.is_err(), "expected no frame, got {:?}", got);
}

/// Wait for the relay to close a session
async fn wait_closed(ws: &mut Ws) {
    let ended = timeout(STEP, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "relay should have closed the session");
}

async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// Poll the status endpoint until the counts match
async fn wait_for_counts(client: &SubmitClient, producers: usize, requesters: usize) {
    timeout(STEP, async {
        loop {
            let status = client.status().await.unwrap();
            if status.producer_connections == producers
                && status.requester_connections == requesters
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("session counts never converged");
}

fn prompt(client_id: Option<&str>) -> PromptRequest {
    PromptRequest {
        user_prompt: Some("What is the capital of France?".into()),
        system_prompt: Some("You are a helpful assistant.".into()),
        target_service: Some("chatgpt".into()),
        client_id: client_id.map(Into::into),
    }
}

#[tokio::test]
async fn test_broadcast_and_forward_scenario() {
    let addr = start_relay().await;
    let client = SubmitClient::new(format!("http://{}", addr));

    let (mut p1, _) = connect(addr, "/ws").await;
    let (mut p2, _) = connect(addr, "/ws").await;
    let (mut r1, r1_id) = connect(addr, "/ws/client").await;

    let accepted = client.send_prompt(&prompt(Some(&r1_id))).await.unwrap();
    assert!(accepted.success);
    assert_eq!(accepted.producers, 2);
    assert_eq!(accepted.client_id.as_ref().map(|c| c.as_str()), Some(r1_id.as_str()));

    let d1 = next_json(&mut p1).await;
    let d2 = next_json(&mut p2).await;
    assert_eq!(d1, d2);
    assert_eq!(d1["type"], "inject_prompt");
    assert_eq!(d1["clientId"], r1_id.as_str());
    assert_eq!(d1["taskId"], accepted.task_id.as_str());
    assert_eq!(d1["userPrompt"], "What is the capital of France?");

    send_json(
        &mut p1,
        json!({"type": "llm_response", "clientId": r1_id, "text": "Paris", "done": true}),
    )
    .await;
    assert_eq!(
        next_json(&mut r1).await,
        json!({"type": "response_chunk", "text": "Paris", "done": true})
    );

    // The second producer's answer is forwarded as well
    send_json(
        &mut p2,
        json!({"type": "llm_response", "clientId": r1_id, "text": "Paris.", "done": true}),
    )
    .await;
    assert_eq!(
        next_json(&mut r1).await,
        json!({"type": "response_chunk", "text": "Paris.", "done": true})
    );

    assert_silent(&mut p1).await;
    assert_silent(&mut p2).await;
}

#[tokio::test]
async fn test_submit_without_producers() {
    let addr = start_relay().await;
    let client = SubmitClient::new(format!("http://{}", addr));
    let (mut r1, r1_id) = connect(addr, "/ws/client").await;

    let err = client.send_prompt(&prompt(Some(&r1_id))).await.unwrap_err();

    assert!(matches!(err, RelayError::NoProducersConnected));
    assert_silent(&mut r1).await;
}

#[tokio::test]
async fn test_submit_validation() {
    let addr = start_relay().await;
    let http = reqwest::Client::new();
    let (mut p1, _) = connect(addr, "/ws").await;

    let response = http
        .post(format!("http://{}/api/send-prompt", addr))
        .json(&json!({"userPrompt": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Missing required fields");

    let response = http
        .post(format!("http://{}/api/send-prompt", addr))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    assert_silent(&mut p1).await;
}

#[tokio::test]
async fn test_status_tracks_sessions() {
    let addr = start_relay().await;
    let client = SubmitClient::new(format!("http://{}", addr));

    let status = client.status().await.unwrap();
    assert_eq!(status.status, "ok");
    assert_eq!(status.producer_connections, 0);
    assert_eq!(status.requester_connections, 0);

    let (p1, _) = connect(addr, "/ws").await;
    let (_r1, _) = connect(addr, "/ws/client").await;
    let (_r2, _) = connect(addr, "/ws/client").await;
    wait_for_counts(&client, 1, 2).await;

    drop(p1);
    wait_for_counts(&client, 0, 2).await;
}

#[tokio::test]
async fn test_departed_requester_output_is_dropped() {
    let addr = start_relay().await;
    let client = SubmitClient::new(format!("http://{}", addr));

    let (mut p1, _) = connect(addr, "/ws").await;
    let (mut r1, r1_id) = connect(addr, "/ws/client").await;
    let (mut r2, r2_id) = connect(addr, "/ws/client").await;

    send_json(
        &mut p1,
        json!({"type": "llm_response", "clientId": r1_id, "text": "Par", "done": false}),
    )
    .await;
    assert_eq!(next_json(&mut r1).await["text"], "Par");

    r1.close(None).await.unwrap();
    wait_for_counts(&client, 1, 1).await;

    send_json(
        &mut p1,
        json!({"type": "llm_response", "clientId": r1_id, "text": "is", "done": true}),
    )
    .await;
    send_json(
        &mut p1,
        json!({"type": "llm_response", "clientId": r2_id, "text": "Berlin", "done": true}),
    )
    .await;

    assert_eq!(
        next_json(&mut r2).await,
        json!({"type": "response_chunk", "text": "Berlin", "done": true})
    );
    // Nothing comes back to the producer and it stays registered
    assert_silent(&mut p1).await;
    wait_for_counts(&client, 1, 1).await;
}

#[tokio::test]
async fn test_malformed_frame_closes_only_that_session() {
    let addr = start_relay().await;
    let client = SubmitClient::new(format!("http://{}", addr));

    let (mut bad, _) = connect(addr, "/ws").await;
    let (mut good, _) = connect(addr, "/ws").await;
    let (mut r1, r1_id) = connect(addr, "/ws/client").await;

    bad.send(Message::Text("{definitely not json".into())).await.unwrap();

    wait_closed(&mut bad).await;
    wait_for_counts(&client, 1, 1).await;

    send_json(
        &mut good,
        json!({"type": "llm_response", "clientId": r1_id, "text": "ok", "done": true}),
    )
    .await;
    assert_eq!(next_json(&mut r1).await["text"], "ok");
}

#[tokio::test]
async fn test_incomplete_output_closes_producer() {
    let addr = start_relay().await;
    let client = SubmitClient::new(format!("http://{}", addr));

    let (mut p1, _) = connect(addr, "/ws").await;
    let (mut r1, r1_id) = connect(addr, "/ws/client").await;

    // No text or done: not a fragment to invent defaults for
    send_json(&mut p1, json!({"type": "llm_response", "clientId": r1_id})).await;

    wait_closed(&mut p1).await;
    wait_for_counts(&client, 0, 1).await;
    assert_silent(&mut r1).await;
}

#[tokio::test]
async fn test_unknown_upgrade_path_rejected() {
    let addr = start_relay().await;
    let client = SubmitClient::new(format!("http://{}", addr));

    assert!(connect_async(format!("ws://{}/ws/other", addr)).await.is_err());
    assert!(connect_async(format!("ws://{}/", addr)).await.is_err());

    wait_for_counts(&client, 0, 0).await;
}

#[tokio::test]
async fn test_unknown_upgrade_path_drops_transport() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let addr = start_relay().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /ws/other HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    // read_to_end only returns once the relay closes its side
    let mut raw = Vec::new();
    timeout(STEP, stream.read_to_end(&mut raw))
        .await
        .expect("relay kept the connection open")
        .unwrap();
    let raw = String::from_utf8_lossy(&raw);
    assert!(raw.starts_with("HTTP/1.1 404"), "unexpected reply: {}", raw);
    assert!(raw.to_ascii_lowercase().contains("connection: close"));
}

#[tokio::test]
async fn test_requester_submits_over_websocket() {
    let addr = start_relay().await;

    let (mut p1, _) = connect(addr, "/ws").await;
    let (mut r1, r1_id) = connect(addr, "/ws/client").await;

    send_json(
        &mut r1,
        json!({"type": "submit_prompt", "userPrompt": "Hi", "targetService": "claude"}),
    )
    .await;

    let dispatch = next_json(&mut p1).await;
    assert_eq!(dispatch["type"], "inject_prompt");
    assert_eq!(dispatch["clientId"], r1_id.as_str());
    assert_eq!(dispatch["targetService"], "claude");

    let ack = next_json(&mut r1).await;
    assert_eq!(ack["type"], "submit_accepted");
    assert_eq!(ack["clientId"], r1_id.as_str());
    assert_eq!(ack["taskId"], dispatch["taskId"]);
    assert_eq!(ack["producers"], 1);
}

#[tokio::test]
async fn test_echo_producer_round_trip() {
    let addr = start_relay().await;
    let client = SubmitClient::new(format!("http://{}", addr));

    let mut producer = PeerConnection::spawn(PeerConfig::producer(&format!("ws://{}", addr)));
    timeout(STEP, producer.wait_connected())
        .await
        .expect("producer never connected")
        .unwrap();

    let (mut r1, r1_id) = connect(addr, "/ws/client").await;
    client.send_prompt(&prompt(Some(&r1_id))).await.unwrap();

    let task = timeout(STEP, async {
        loop {
            match producer.recv().await {
                Some(ServerMessage::InjectPrompt(task)) => return task,
                Some(_) => continue,
                None => panic!("producer peer stopped"),
            }
        }
    })
    .await
    .expect("no task dispatched");

    for fragment in echo_fragments(&task) {
        producer.send(fragment).await.unwrap();
    }

    let mut text = String::new();
    loop {
        let chunk = next_json(&mut r1).await;
        assert_eq!(chunk["type"], "response_chunk");
        text.push_str(chunk["text"].as_str().unwrap());
        if chunk["done"] == true {
            break;
        }
    }
    assert_eq!(text, "What is the capital of France?");
}

#[tokio::test]
async fn test_health_and_cors() {
    let addr = start_relay().await;
    let http = reqwest::Client::new();

    let response = http
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["healthy"], true);

    let response = http
        .request(reqwest::Method::OPTIONS, format!("http://{}/api/send-prompt", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    tokio_test::assert_ok!(
        http.get(format!("http://{}/missing", addr)).send().await
    );
}
