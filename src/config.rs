//! Configuration for the relay
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::{IpAddr, SocketAddr};

/// Default listen port, shared with the peer defaults
pub const DEFAULT_PORT: u16 = 3000;

/// Default per-session outbound buffer (frames)
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// prompt-relay - WebSocket relay between prompt producers and requesters
#[derive(Parser, Debug, Clone)]
#[command(name = "prompt-relay")]
#[command(about = "Relays prompts to producer peers and streams their output back to requesters")]
pub struct Args {
    /// Address to bind on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on (HTTP API and both WebSocket paths)
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Frames buffered per session before further sends to it are dropped
    #[arg(long, env = "OUTBOUND_BUFFER", default_value_t = DEFAULT_OUTBOUND_BUFFER)]
    pub outbound_buffer: usize,
}

impl Args {
    /// Socket address to listen on
    pub fn listen_addr(&self) -> Result<SocketAddr, String> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|e| format!("HOST '{}' is not an IP address: {}", self.host, e))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.outbound_buffer == 0 {
            return Err("OUTBOUND_BUFFER must be greater than zero".to_string());
        }

        self.listen_addr()?;

        Ok(())
    }
}
