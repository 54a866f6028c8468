//! Storage Probe Controller
//!
//! Schedules provision and mount probes for the storage classes named by
//! StorageProbe resources, and measures whether each probe pod gets its
//! volume and starts within the configured threshold.

mod backoff;
mod config;
mod controller;
mod error;
mod manifests;
mod naming;
mod observer;
mod pods;
mod reconciler;
mod schedule;
mod topology;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting storage probe controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace);
    info!("  Probe image: {}", config.probe_image);
    info!("  Collector URL: {}", config.collector_url);
    info!("  Collector bind address: {}", config.collector_bind_addr);
    info!("  Observer tick: {:?}", config.observer_tick);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
