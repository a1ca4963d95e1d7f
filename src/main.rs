//! Drocsid Chat Server - Entry Point
//!
//! Loads configuration, opens the user store and accepts connections.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use drocsid::{serve, JsonFileStore, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=drocsid=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("drocsid=info")),
        )
        .init();

    // Bind address from the command line, the rest from the environment
    let config = ServerConfig::from_env()?;

    let store = Arc::new(JsonFileStore::open(&config.data_dir)?);
    info!("User records in {}", config.data_dir.display());

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("Drocsid Chat Server listening on {}", config.bind_addr);

    serve(listener, config, store).await;
    Ok(())
}
