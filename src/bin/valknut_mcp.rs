//! Stdio entry point for the JSON-RPC tool protocol.
//!
//! Messages are framed one per line on stdin/stdout; logging goes to stderr
//! so it never corrupts the protocol stream.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use valknut::api::engine::ValknutEngine;
use valknut::api::server::McpServer;
use valknut::core::config::ValknutConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let engine = Arc::new(ValknutEngine::new(ValknutConfig::default())?);
    let server = McpServer::new(engine);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    tracing::info!("valknut tool protocol server started");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<serde_json::Value>(line) {
            Ok(message) => server.handle_message(message).await,
            Err(err) => Some(McpServer::parse_error_response(err.to_string())),
        };

        if let Some(response) = response {
            let mut frame = serde_json::to_string(&response)?;
            frame.push('\n');
            stdout.write_all(frame.as_bytes()).await?;
            stdout.flush().await?;
        }
    }

    tracing::info!("valknut tool protocol server shutting down");
    Ok(())
}
