//! # Evalsys MCP Server
//!
//! Entry point for the MCP (Model Context Protocol) bridge to Evalsys.
//!
//! Reads configuration from environment variables:
//! - `EVALSYS_URL`: Evalsys server URL (default: `http://localhost:8080`)
//! - `EVALSYS_API_KEY`: Optional Bearer token for authentication
//!
//! Talks to MCP clients over stdio and forwards read-only requests to the
//! Evalsys HTTP API.

mod client;
mod server;

use client::EvalsysClient;
use rmcp::{ServiceExt, transport::stdio};
use server::EvalsysMcp;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the MCP transport; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let url = std::env::var("EVALSYS_URL").unwrap_or_else(|_| "http://localhost:8080".into());
    let api_key = std::env::var("EVALSYS_API_KEY").ok();

    tracing::info!("Evalsys MCP server starting, target: {}", url);

    let client = EvalsysClient::new(url, api_key);
    let mcp = EvalsysMcp::new(client);

    let service = mcp.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("MCP serve error: {:?}", e);
    })?;

    service.waiting().await?;
    Ok(())
}
