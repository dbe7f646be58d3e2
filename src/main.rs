//! Visitor gate - visitor registration and security check-in service
//!
//! Residents pre-register visitors; security staff check them in by QR
//! token, one-time passcode or name and mark them as arrived.
//!
//! Module structure:
//! - `domain/` - Core types (Visitor, credentials, errors)
//! - `io/` - External interfaces (HTTP API, journal, Prometheus)
//! - `services/` - Business logic (VisitorDirectory, SecurityDesk)
//! - `infra/` - Infrastructure (Config, Metrics, Store)

use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use visitor_gate::infra::{Config, MemoryStore, Metrics, VisitorStore};
use visitor_gate::io::{start_api_server, ApiState};

/// Visitor gate - visitor registration and check-in API
#[derive(Parser, Debug)]
#[command(name = "visitor-gate", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Default: INFO, use RUST_LOG=debug for per-request logs
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    }

    info!(version = %env!("CARGO_PKG_VERSION"), git_hash = %env!("GIT_HASH"), "visitor-gate starting");

    let config = Config::load_from_path(&args.config);
    let addr = config.http_addr()?;

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        http_addr = %addr,
        journal_file = %config.journal_file().unwrap_or("none"),
        otp_digits = %config.otp_digits(),
        max_issue_attempts = %config.max_issue_attempts(),
        metrics_interval_secs = %config.metrics_interval_secs(),
        "config_loaded"
    );
    warn!("api has no authentication; expose it only on a trusted network");

    let store: Arc<dyn VisitorStore> = match config.journal_file() {
        Some(path) => Arc::new(MemoryStore::open(path)?),
        None => {
            warn!("no journal_file configured, visitors are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let metrics = Arc::new(Metrics::new());
    let state = Arc::new(ApiState::new(&config, store, metrics.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Periodic metrics summary in the log (disabled with interval_secs = 0)
    let metrics_interval = config.metrics_interval_secs();
    if metrics_interval > 0 {
        let mut metrics_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
            // First tick fires immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => metrics.report().log(),
                    _ = metrics_shutdown.changed() => break,
                }
            }
        });
    }

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let listener = TcpListener::bind(addr).await?;
    start_api_server(listener, state, shutdown_rx).await?;

    info!("visitor-gate shutdown complete");
    Ok(())
}
