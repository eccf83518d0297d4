//! Brigade server: presence ingest, fan-out, and unread counters.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8000
//! cargo run --bin brigade-server
//!
//! # Run on custom address
//! cargo run --bin brigade-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! BRIGADE_BIND=127.0.0.1:8080 cargo run --bin brigade-server
//! ```

use std::sync::Arc;

use brigade_server::config::{ServerCliArgs, ServerConfig};
use brigade_server::server::{self, ServerState};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        active_window_secs = config.active_window_secs,
        ttl_secs = config.ttl_secs,
        geofence = config.geofence.is_some(),
        "starting brigade server"
    );

    let state = Arc::new(ServerState::with_config(&config));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "brigade server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
