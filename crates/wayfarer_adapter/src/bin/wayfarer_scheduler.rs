#![forbid(unsafe_code)]

use std::sync::Arc;

use tokio::sync::watch;
use wayfarer_adapter::{init_tracing, WayfarerRuntime, WayfarerRuntimeConfig};
use wayfarer_os::clock::SystemClock;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = WayfarerRuntimeConfig::from_env()?;
    let runtime = WayfarerRuntime::bootstrap(&config, Arc::new(SystemClock))?;
    if config.roster.is_empty() {
        tracing::warn!("WAYFARER_ROSTER is empty; ticks will have no agents");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = runtime.scheduler().clone().spawn(shutdown_rx, None);

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested; waiting for the running tick");
    let _ = shutdown_tx.send(true);
    worker.await?;
    Ok(())
}
