//! Echo producer - stand-in producer peer for local testing
//!
//! Connects to the relay's producer path and answers every dispatched task
//! by streaming the prompt back word by word.
//!
//! Usage:
//!   echo-producer --relay-url ws://localhost:3000
//!
//! Environment variables:
//!   RELAY_URL - Relay base WebSocket URL (default: ws://localhost:3000)
//!   RECONNECT_DELAY_MS - First reconnect delay in milliseconds (default: 5000)

use clap::Parser;
use prompt_relay::client::{echo::echo_fragments, PeerConfig, PeerConnection, ReconnectPolicy};
use prompt_relay::relay::ServerMessage;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "echo-producer")]
#[command(about = "Producer peer that echoes prompts back through the relay")]
#[command(version)]
struct Args {
    /// Relay base WebSocket URL
    #[arg(long, env = "RELAY_URL", default_value = "ws://localhost:3000")]
    relay_url: String,

    /// First reconnect delay in milliseconds (doubles up to 60s)
    #[arg(long, env = "RECONNECT_DELAY_MS", default_value = "5000")]
    reconnect_delay_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,prompt_relay=debug")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = PeerConfig::producer(&args.relay_url).with_reconnect(ReconnectPolicy {
        initial_delay: Duration::from_millis(args.reconnect_delay_ms),
        ..ReconnectPolicy::default()
    });
    info!("Starting echo producer against {}", config.url);

    let mut peer = PeerConnection::spawn(config);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            msg = peer.recv() => {
                let Some(msg) = msg else { break };
                match msg {
                    ServerMessage::ConnectionEstablished { session_id, .. } => {
                        info!("Registered as producer {:?}", session_id);
                    }
                    ServerMessage::InjectPrompt(task) => {
                        info!(
                            "Task {} for {:?} ({})",
                            task.task_id, task.client_id, task.target_service
                        );
                        for fragment in echo_fragments(&task) {
                            if let Err(e) = peer.send(fragment).await {
                                warn!("Dropping output for task {}: {}", task.task_id, e);
                                break;
                            }
                        }
                    }
                    other => warn!("Ignoring unexpected message: {:?}", other),
                }
            }
        }
    }

    info!("Echo producer shutting down");
}
