//! Halyard fleet coordinator binary.
//!
//! Tracks worker liveness, keeps the program cache warm and follows the
//! domain file as it changes.

use tracing::info;
use tracing_subscriber::EnvFilter;

use halyard_fleet::{FleetConfig, FleetService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("halyard_fleet=info".parse()?))
        .init();

    info!("Halyard fleet coordinator starting");

    let config = FleetConfig::load()?;
    info!(
        listen_addr = %config.api.listen_addr,
        sweep_interval_secs = config.coordinator.sweep_interval.as_secs(),
        refresh_interval_secs = config.coordinator.refresh_interval.as_secs(),
        "Configuration loaded"
    );

    FleetService::new(config).run().await?;

    Ok(())
}
