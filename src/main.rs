//! parleyd - realtime one-to-one messaging relay.
//!
//! Tracks presence, enforces one live session per identity and moves every
//! message through `sent → delivered → read`.

mod config;
mod db;
mod error;
mod handlers;
mod http;
mod metrics;
mod network;
mod protocol;
mod security;
mod services;
mod state;
mod telemetry;

use crate::config::Config;
use crate::db::Database;
use crate::network::Gateway;
use crate::security::Credentials;
use crate::state::Matrix;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(server = %config.server.name, "Starting parleyd");

    let db = Database::new(&config.database.path).await?;

    // Nobody is bound yet, so any online flag is left over from a previous run.
    let reset = db.identities().reset_presence(chrono::Utc::now()).await?;
    if reset > 0 {
        info!(count = reset, "Cleared stale presence from previous run");
    }

    let credentials = Credentials::new(&config.security)?;
    let matrix = Arc::new(Matrix::new(&config, db.clone(), credentials));

    let http_port = config.server.http_port.unwrap_or(9090);
    if http_port == 0 {
        info!("HTTP surface disabled");
    } else {
        metrics::init();
        info!("Metrics initialized");

        let matrix = Arc::clone(&matrix);
        tokio::spawn(async move {
            http::run_http_server(http_port, matrix).await;
        });
    }

    let gateway = Gateway::bind(config.listen.clone(), Arc::clone(&matrix)).await?;
    info!(address = %gateway.local_addr()?, "parleyd ready");

    let result = tokio::select! {
        result = gateway.run() => result,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Shutdown requested"),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
            Ok(())
        }
    };

    db.close().await;
    info!("Database closed, exiting");
    result
}
