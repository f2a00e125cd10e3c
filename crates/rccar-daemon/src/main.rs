//! RC Car Bridge Daemon
//!
//! Relays host commands over D-Bus to the car's Arduino controller on a serial port.

mod config;
mod dbus;
mod dispatcher;

use anyhow::{Context, Result};
use rccar_hw::{SerialLink, SerialOpener};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/default.toml".to_string());

    let config = Config::load(&config_path).context("Failed to load configuration")?;
    info!("Loaded configuration from: {}", config_path);

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    // Bring up the serial link
    let opener = SerialOpener::new(&config.serial.device, config.serial.baud);
    let link = Arc::new(
        SerialLink::new(opener, config.reconnect.policy())
            .with_reconnect_on_write_error(config.serial.reconnect_on_write_error),
    );
    let link_runner = link.clone();
    let link_shutdown_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = link_runner.run().await {
            error!("Serial link stopped: {}", e);
            let _ = link_shutdown_tx.send(()).await;
        }
    });

    let dispatcher = Arc::new(Dispatcher::from_config(link, &config));

    // Start D-Bus service
    let _dbus_connection = dbus::run_dbus_server(dispatcher, shutdown_tx, config.dbus.bus)
        .await
        .context("Failed to start D-Bus service")?;

    // Setup Unix signal handlers
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = shutdown_rx.recv() => {
            info!("Shutdown requested");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
        }
    }

    Ok(())
}
