//! # Evalsys - Evaluation Server
//!
//! The main binary for the Evalsys evaluation engine.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for evaluations, policy checks and the hierarchy
//! - Notification ticker for reminder and phase-change jobs
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     apps/evalsys (THE BINARY)                   │
//! │                                                                 │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐     │
//! │  │   CLI       │    │   HTTP API  │    │  Notification    │     │
//! │  │  (clap)     │    │   (axum)    │    │  ticker (tokio)  │     │
//! │  └──────┬──────┘    └──────┬──────┘    └────────┬─────────┘     │
//! │         │                  │                    │               │
//! │         └──────────────────┼────────────────────┘               │
//! │                            ▼                                    │
//! │                    ┌───────────────┐                            │
//! │                    │ evalsys-core  │                            │
//! │                    │ (THE LOGIC)   │                            │
//! │                    └───────────────┘                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! evalsys server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! evalsys status
//! evalsys state --start 2026-01-12T08:00:00Z --due ... --stop ... --view ...
//! evalsys check --state Active --field title
//! ```

use clap::Parser;
use evalsys::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // EVALSYS_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("EVALSYS_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "evalsys=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Evalsys startup banner.
fn print_banner() {
    println!(
        r#"
  ███████╗██╗   ██╗ █████╗ ██╗     ███████╗██╗   ██╗███████╗
  ██╔════╝██║   ██║██╔══██╗██║     ██╔════╝╚██╗ ██╔╝██╔════╝
  █████╗  ██║   ██║███████║██║     ███████╗ ╚████╔╝ ███████╗
  ██╔══╝  ╚██╗ ██╔╝██╔══██║██║     ╚════██║  ╚██╔╝  ╚════██║
  ███████╗ ╚████╔╝ ██║  ██║███████╗███████║   ██║   ███████║
  ╚══════╝  ╚═══╝  ╚═╝  ╚═╝╚══════╝╚══════╝   ╚═╝   ╚══════╝

  Evaluation Server v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
