//! # graphcast server
//!
//! Broadcasts graph updates to every WebSocket client watching the graph.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! graphcast
//!
//! # Run with environment variables
//! GRAPHCAST_PORT=8080 GRAPHCAST_HOST=0.0.0.0 graphcast
//!
//! # Subscribe to a graph
//! websocat "ws://127.0.0.1:8080/ws?graphuuid=3f2b..."
//!
//! # Publish an update
//! curl -X POST --data '{"txn":1}' http://127.0.0.1:8080/graphs/3f2b.../publish
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "graphcast_server=debug,graphcast_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting graphcast on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
