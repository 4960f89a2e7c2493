//! # elevox-server
//!
//! Floor detection daemon. Runs the background scan cycle and serves its
//! results over HTTP.
//!
//! ## Running
//!
//! ```bash
//! # Development, with the simulated adapter
//! cargo run --package elevox-server
//!
//! # Production, scanning through BlueZ
//! cargo build --release --package elevox-server --features bluetooth
//! ELEVOX_ENV=production ./elevox-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;

use anyhow::Context;
use elevox_core::{BeaconRegistry, ElevoxConfig, ElevoxError, FloorScheduler, ScanAdapter};
use elevox_server::logging;
use elevox_server::server::serve;
use elevox_server::state::AppState;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ElevoxConfig::load_default()
        .map_err(ElevoxError::from)
        .context("Failed to load configuration")?;
    logging::init(&config.logging, logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting elevox-server");

    let registry = BeaconRegistry::builtin();
    info!(beacons = registry.len(), floors = ?registry.floors(), "Beacon registry loaded");

    let adapter = scan_adapter(&config);
    run(adapter, registry, config).await
}

async fn run<A: ScanAdapter>(
    adapter: A,
    registry: Arc<BeaconRegistry>,
    config: ElevoxConfig,
) -> anyhow::Result<()> {
    let mut scheduler = FloorScheduler::from_config(adapter, Arc::clone(&registry), &config);
    if let Err(err) = scheduler.start().map_err(ElevoxError::from) {
        error!(
            error = %err,
            code = err.error_code(),
            terminal = err.is_terminal(),
            "Floor detection not started"
        );
    }

    let state = AppState::new(scheduler.handle(), registry, config.detection.clone());

    let addr = config.server.bind_address;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    let served = serve(listener, state, shutdown_signal()).await;

    scheduler.stop().await;
    info!("elevox-server stopped");

    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[cfg(all(feature = "bluetooth", target_os = "linux"))]
fn scan_adapter(config: &ElevoxConfig) -> elevox_core::BluerAdapter {
    info!(adapter = ?config.scan.adapter, "Scanning through BlueZ");
    elevox_core::BluerAdapter::new(config.scan.adapter.clone())
}

#[cfg(not(all(feature = "bluetooth", target_os = "linux")))]
fn scan_adapter(_config: &ElevoxConfig) -> elevox_core::SimulatedAdapter {
    warn!("Built without Bluetooth support, using the simulated adapter");
    elevox_core::SimulatedAdapter::default()
}
