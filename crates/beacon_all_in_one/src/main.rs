mod config;

use beacon_runner::Runner;
use common::domain::{DeviceRepository, InMemoryDeviceRepository};
use common::postgres::{PostgresClient, PostgresDeviceRepository};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use crate::config::{ServiceConfig, StoreBackend};
use device_tracker::device_tracker::{DeviceTracker, DeviceTrackerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    // Initialize configuration and tracing
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize telemetry (tracing + OpenTelemetry for traces and logs)
    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        store_backend = ?config.store_backend,
        "Starting beacon-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let repository = match initialize_repository(&config).await {
        Ok(repository) => repository,
        Err(e) => {
            error!("Failed to initialize device store: {:#}", e);
            std::process::exit(1);
        }
    };

    let http_addr = match config.http_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid HTTP configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let device_tracker = DeviceTracker::new(
        repository,
        DeviceTrackerConfig {
            http_addr,
            mqtt: config.mqtt_config(),
            topics: config.topic_config(),
            sweep_interval: config.sweep_interval(),
            stale_after: config.stale_after(),
        },
    );

    // Build runner with all processes
    let mut runner = Runner::new();
    for (name, process) in device_tracker.into_runner_processes() {
        runner = runner.with_boxed_process(name, process);
    }

    // Add cleanup handlers
    runner = runner
        .with_closer(move || async move {
            info!("Running cleanup tasks...");

            // Shutdown telemetry and flush pending traces and logs
            shutdown_telemetry(telemetry_providers);

            info!("Cleanup complete");
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10));

    // Run the service
    runner.run().await;
}

async fn initialize_repository(config: &ServiceConfig) -> anyhow::Result<Arc<dyn DeviceRepository>> {
    match config.store_backend {
        StoreBackend::Memory => {
            info!("Using in-memory device store");
            Ok(Arc::new(InMemoryDeviceRepository::new()))
        }
        StoreBackend::Postgres => {
            info!("Initializing PostgreSQL...");
            let client = PostgresClient::new(&config.postgres_config())?;

            tokio::time::timeout(config.startup_timeout(), async {
                client.ping().await?;
                let repository = PostgresDeviceRepository::new(client.clone());
                repository.ensure_schema().await?;
                anyhow::Ok(repository)
            })
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "PostgreSQL not ready within {}s",
                    config.startup_timeout_secs
                )
            })?
            .map(|repository| Arc::new(repository) as Arc<dyn DeviceRepository>)
        }
    }
}
