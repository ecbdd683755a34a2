use crate::domain::{
    DeviceIngestionService, DeviceReconciler, Normalizer, SnapshotBroadcaster, StalenessSweeper,
    TopicConfig,
};
use crate::mqtt::{run_mqtt_subscriber, MqttConfig};
use crate::websocket::{router, run_http_server, ConnectionRegistry, ViewerState};
use beacon_runner::AppProcess;
use common::domain::DeviceRepository;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct DeviceTrackerConfig {
    pub http_addr: SocketAddr,
    pub mqtt: MqttConfig,
    pub topics: TopicConfig,
    pub sweep_interval: Duration,
    pub stale_after: chrono::Duration,
}

/// Wires the ingestion pipeline, viewer endpoint and sweeper around one store
pub struct DeviceTracker {
    config: DeviceTrackerConfig,
    ingestion: DeviceIngestionService,
    broadcaster: Arc<SnapshotBroadcaster>,
    sweeper: Arc<StalenessSweeper>,
}

impl DeviceTracker {
    pub fn new(repository: Arc<dyn DeviceRepository>, config: DeviceTrackerConfig) -> Self {
        debug!("initializing device tracker module");

        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(SnapshotBroadcaster::new(Arc::clone(&repository), registry));
        let reconciler = Arc::new(DeviceReconciler::new(Arc::clone(&repository)));
        let normalizer = Arc::new(Normalizer::new(config.topics.clone()));

        let ingestion =
            DeviceIngestionService::new(normalizer, reconciler, Arc::clone(&broadcaster));

        let sweeper = Arc::new(
            StalenessSweeper::new(repository, Arc::clone(&broadcaster))
                .with_interval(config.sweep_interval)
                .with_stale_after(config.stale_after),
        );

        Self {
            config,
            ingestion,
            broadcaster,
            sweeper,
        }
    }

    /// Long-running processes for the runner: HTTP server, MQTT subscriber, sweeper
    pub fn into_runner_processes(self) -> Vec<(&'static str, AppProcess)> {
        let http_server: AppProcess = Box::new({
            let broadcaster = Arc::clone(&self.broadcaster);
            let addr = self.config.http_addr;
            move |ctx| {
                Box::pin(async move {
                    let router = router(ViewerState::new(broadcaster, ctx.clone()));
                    run_http_server(addr, router, ctx).await
                })
            }
        });

        let mqtt_subscriber: AppProcess = Box::new({
            let config = self.config.mqtt.clone();
            let filters = self.config.topics.subscription_filters();
            let ingestion = self.ingestion.clone();
            move |ctx| Box::pin(async move { run_mqtt_subscriber(config, filters, ingestion, ctx).await })
        });

        let staleness_sweeper: AppProcess = Box::new({
            let sweeper = Arc::clone(&self.sweeper);
            move |ctx| Box::pin(async move { sweeper.run(ctx).await })
        });

        vec![
            ("http_server", http_server),
            ("mqtt_subscriber", mqtt_subscriber),
            ("staleness_sweeper", staleness_sweeper),
        ]
    }
}
