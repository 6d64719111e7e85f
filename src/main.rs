// Main entry point - Dependency injection and session startup
mod domain;
mod application;
mod infrastructure;

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::application::session::SessionManager;
use crate::infrastructure::config::load_realtime_config;
use crate::infrastructure::snapshot_renderer::SnapshotRenderer;
use crate::infrastructure::transport::TcpConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = load_realtime_config()?;

    // Create adapters (infrastructure layer)
    let connector = Arc::new(TcpConnector::new(
        config.server.host.clone(),
        config.server.port,
    ));
    let renderer = Arc::new(SnapshotRenderer::new(
        config.output.path.clone(),
        config.stream.max_gates,
    ));
    tracing::info!(
        output = %renderer.output().display(),
        beam = config.stream.beam,
        "Writing products"
    );

    // Run sessions (application layer)
    let manager = SessionManager::new(connector, renderer, config.session_settings());
    manager.run().await?;

    tracing::info!("Closed connection");
    Ok(())
}
