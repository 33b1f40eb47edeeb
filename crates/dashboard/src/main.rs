//! Perception Dashboard - Main Entry Point

use std::path::PathBuf;

use dashboard::{init_logging, run_server, DashboardConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::var_os("PERCEPTION_CONFIG").map(PathBuf::from);
    let config = DashboardConfig::load(config_path.as_deref())?;
    init_logging(&config.log_level)?;

    info!("=== Perception Dashboard v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Perception backend at {}", config.backend.base_url);

    run_server(config).await?;

    Ok(())
}
