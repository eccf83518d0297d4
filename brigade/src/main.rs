//! Brigade: headless presence and notification sync client.
//!
//! Connects to a Brigade server as one member, keeps the brigade's presence
//! and the unread count current, reports this device's position, and logs
//! every change. Configuration via CLI flags, environment variables, or
//! config file (`~/.config/brigade/config.toml`).
//!
//! ```bash
//! # Report the fallback position as "igi"
//! cargo run --bin brigade -- --user-id igi
//!
//! # Report a fixed position to a remote server
//! cargo run --bin brigade -- --user-id igi --server-url https://brigade.example.org \
//!     --latitude 46.3 --longitude 16.35
//!
//! # Only poll while the push channel is down, log to a file
//! BRIGADE_USER=igi cargo run --bin brigade -- --poll-mode fallback --log-file /tmp/brigade.log
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use brigade::api::HttpBackend;
use brigade::config::{CliArgs, ClientConfig};
use brigade::location::{LocationSource, StaticSource, UnavailableSource};
use brigade::session::{Session, SessionConfig};

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let session_config = match config.to_session_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let backend = match HttpBackend::new(
        &session_config.server_url,
        session_config.token.clone(),
        session_config.request_timeout,
    ) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        user_id = %session_config.user_id,
        server = %session_config.server_url,
        poll_mode = ?session_config.poll_mode,
        "brigade client starting"
    );

    match config.fixed_position {
        Some(coordinate) => {
            run(&session_config, backend, Arc::new(StaticSource::new(coordinate))).await;
        }
        None => {
            tracing::info!(
                fallback = %session_config.reporter.fallback,
                "no positioning configured"
            );
            run(&session_config, backend, Arc::new(UnavailableSource)).await;
        }
    }

    tracing::info!("brigade client exiting");
}

/// Runs a session until Ctrl-C, logging presence and unread changes.
async fn run<L: LocationSource>(config: &SessionConfig, backend: Arc<HttpBackend>, source: Arc<L>) {
    let mut session = Session::start(config, config.ws_connector(), backend, source);
    let mut presence = session.presence();
    let mut unread = session.unread();
    let mut connection = session.selector().watch_state();

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(err = %e, "failed to listen for ctrl-c");
                }
                break;
            }
            Some(snapshot) = presence.changed() => {
                tracing::info!(
                    members = snapshot.len(),
                    active = snapshot.active_count(),
                    "presence"
                );
                for record in snapshot.iter() {
                    tracing::debug!(
                        user_id = %record.user_id,
                        position = %record.coordinate(),
                        status = %record.status,
                        at = %record.timestamp,
                        "member"
                    );
                }
            }
            Ok(()) = unread.changed() => {
                let count = *unread.borrow_and_update();
                tracing::info!(unread = count, "unread private messages");
            }
            Ok(()) = connection.changed() => {
                let state = *connection.borrow_and_update();
                if state == brigade::transport::ConnectionState::Disconnected {
                    tracing::warn!("push channel gave up; relying on polling");
                }
            }
        }
    }

    session.shutdown().await;
}

/// Initialize logging to stderr, or to `file_path` when given.
///
/// Returns a [`WorkerGuard`] for file logging that must be held until
/// shutdown so buffered entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(log_path) = file_path else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
