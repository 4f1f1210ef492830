//! Hostwatch Agent - host telemetry over MQTT
//!
//! Periodically samples local system and container health and publishes it
//! to an MQTT broker, together with Home Assistant discovery configs so every
//! sensor registers itself on the front-end:
//! - CPU (total and per core), RAM, temperature, load averages, uptime
//! - Run status of configured containers
//! - Activity state of one system service

mod config;
mod discovery;
mod error;
mod execution;
mod metrics;
mod mqtt;
mod registry;
mod shutdown;
mod telemetry;

use anyhow::{Context, Result};
use config::AgentConfig;
use discovery::DiscoveryPublisher;
use metrics::SystemSampler;
use registry::SensorRegistry;
use std::sync::Arc;
use std::time::Duration;
use telemetry::TelemetryLoop;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long the MQTT I/O task gets to flush the disconnect
const DISCONNECT_GRACE: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hostwatch_agent=info")),
        )
        .init();

    info!("Hostwatch Agent v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::load()
        .await
        .context("Failed to load configuration")?;

    let sampler = SystemSampler::new(config.service.unit.clone(), config.command_timeout());
    let registry = SensorRegistry::build(&config, sampler.core_count())
        .context("Invalid sensor configuration")?;
    let registry = Arc::new(registry);
    info!(
        "Registry ready: {} sensors for device {}",
        registry.sensor_count(),
        config.device.id
    );

    let (client, eventloop) = mqtt::build_client(&config, registry.sensor_count());
    let (link_tx, link_rx) = mpsc::unbounded_channel();
    let io_task = mqtt::spawn_event_loop(
        eventloop,
        link_tx,
        Duration::from_secs(config.mqtt.retry_delay_secs),
    );
    info!(
        "Connecting to {}:{} as {}",
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        config.client_id()
    );

    let telemetry = TelemetryLoop::new(
        Arc::new(client),
        Box::new(sampler),
        registry,
        DiscoveryPublisher::new(&config),
        config.topics.state.clone(),
        config.topics.availability.clone(),
        config.poll_interval(),
    );
    let report = telemetry.run(link_rx, shutdown::shutdown_signal()).await;

    let abort = io_task.abort_handle();
    if tokio::time::timeout(DISCONNECT_GRACE, io_task).await.is_err() {
        warn!("MQTT I/O did not finish within {:?}, dropping it", DISCONNECT_GRACE);
        abort.abort();
    }

    info!(
        "Stopped after {} ticks: {} published, {} failed, {} skipped, {} discovery batches",
        report.ticks,
        report.published,
        report.failed_publishes,
        report.skipped_ticks,
        report.discovery_batches
    );
    Ok(())
}
