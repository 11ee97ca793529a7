//! Flowplane control plane binary.
//!
//! Runs the control plane for stream pipeline deployments.

use tracing::info;
use tracing_subscriber::EnvFilter;

use flowplane::{FlowConfig, FlowService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("flowplane=info".parse()?))
        .init();

    info!("flowplane control plane starting");

    // Load configuration
    let config = FlowConfig::load().unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        FlowConfig::default()
    });

    info!(
        listen_addr = %config.server.listen_addr,
        database = %config.database.url,
        backend = ?config.backend.kind,
        "configuration loaded"
    );

    let service = FlowService::new(config);
    service.run().await?;

    Ok(())
}
