use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{BatteryUnit, DeviceRepository, InMemoryDeviceRepository};
use device_tracker::domain::{
    DeviceIngestionService, DeviceReconciler, DeviceSnapshot, Normalizer, SnapshotBroadcaster,
};
use device_tracker::websocket::{serve_viewer, ConnectionRegistry, ViewerSink, ViewerState};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<Bytes>>,
}

impl RecordingSink {
    fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().unwrap().clone()
    }

    fn last_snapshot(&self) -> DeviceSnapshot {
        let frames = self.frames();
        serde_json::from_slice(frames.last().expect("no frames received")).unwrap()
    }
}

#[async_trait]
impl ViewerSink for RecordingSink {
    async fn send(&self, payload: Bytes) -> anyhow::Result<()> {
        self.frames.lock().unwrap().push(payload);
        Ok(())
    }
}

struct Pipeline {
    repo: Arc<InMemoryDeviceRepository>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<SnapshotBroadcaster>,
    ingestion: DeviceIngestionService,
}

fn pipeline() -> Pipeline {
    let repo = Arc::new(InMemoryDeviceRepository::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let broadcaster = Arc::new(SnapshotBroadcaster::new(repo.clone(), Arc::clone(&registry)));
    let ingestion = DeviceIngestionService::new(
        Arc::new(Normalizer::default()),
        Arc::new(DeviceReconciler::new(repo.clone())),
        Arc::clone(&broadcaster),
    );

    Pipeline {
        repo,
        registry,
        broadcaster,
        ingestion,
    }
}

const ENVELOPE_TOPIC: &str = "msh/EU_868/2/json/LongFast/!a1b2c3d4";

#[tokio::test]
async fn test_flat_then_partial_flat_then_envelope() {
    let p = pipeline();
    let viewer = Arc::new(RecordingSink::default());
    p.registry.join("browsers", "test", viewer.clone()).await;

    p.ingestion
        .handle_message("devices/d1/status", br#"{"lat":46.0569,"lon":14.5058,"battery_mv":3900}"#)
        .await
        .expect("flat payload should be stored");

    let d1 = p.repo.get_device("d1").await.unwrap().unwrap();
    assert_eq!(d1.lat, 46.0569);
    assert_eq!(d1.lon, 14.5058);
    assert_eq!(d1.battery, 3900);
    assert!(d1.online);

    // A flat payload is a full object; a lone rssi is rejected.
    assert!(p
        .ingestion
        .handle_message("devices/d1/status", br#"{"rssi":-80}"#)
        .await
        .is_none());
    assert_eq!(p.repo.get_device("d1").await.unwrap().unwrap(), d1);
    assert_eq!(viewer.frames().len(), 1);

    p.ingestion
        .handle_message(
            ENVELOPE_TOPIC,
            br#"{"from":3735928320,"type":"position","payload":{"latitude_i":460500000,"longitude_i":145000000,"altitude":300,"sats_in_view":7}}"#,
        )
        .await
        .unwrap();
    let positioned = p.repo.get_device("!deadbe00").await.unwrap().unwrap();

    p.ingestion
        .handle_message(
            ENVELOPE_TOPIC,
            br#"{"from":3735928320,"type":"telemetry","payload":{"battery_level":64,"voltage":3.9}}"#,
        )
        .await
        .unwrap();
    let node = p.repo.get_device("!deadbe00").await.unwrap().unwrap();

    assert_eq!(node.battery, 64);
    assert_eq!(node.battery_unit, BatteryUnit::Percent);
    assert_eq!(node.lat.to_bits(), positioned.lat.to_bits());
    assert_eq!(node.lon.to_bits(), positioned.lon.to_bits());
    assert_eq!(node.sats, 7);

    let snapshot = viewer.last_snapshot();
    assert_eq!(snapshot.message_type, "devices");
    let ids: Vec<_> = snapshot.data.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["!deadbe00", "d1"]);
    assert_eq!(viewer.frames().len(), 3);
}

#[tokio::test]
async fn test_last_commit_wins_and_viewer_converges() {
    let p = pipeline();
    let viewer = Arc::new(RecordingSink::default());
    p.registry.join("browsers", "test", viewer.clone()).await;

    for level in [10, 20] {
        let payload = format!(
            r#"{{"from":3735928320,"type":"telemetry","payload":{{"battery_level":{level},"voltage":3.7}}}}"#
        );
        p.ingestion
            .handle_message(ENVELOPE_TOPIC, payload.as_bytes())
            .await
            .unwrap();
    }

    assert_eq!(p.repo.get_device("!deadbe00").await.unwrap().unwrap().battery, 20);
    assert_eq!(viewer.last_snapshot().data[0].battery, 20);
}

#[tokio::test]
async fn test_concurrent_ingest_converges() {
    let p = pipeline();
    let viewer = Arc::new(RecordingSink::default());
    p.registry.join("browsers", "test", viewer.clone()).await;

    let mut tasks = Vec::new();
    for i in 0..16 {
        let ingestion = p.ingestion.clone();
        tasks.push(tokio::spawn(async move {
            let topic = format!("devices/dev-{}/status", i % 4);
            let payload = format!(r#"{{"lat":46.0,"lon":14.0,"battery_mv":{}}}"#, 3000 + i);
            ingestion.handle_message(&topic, payload.as_bytes()).await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_some());
    }

    assert_eq!(p.repo.list_devices().await.unwrap().len(), 4);

    // One more broadcast after the dust settles matches a fresh assembly.
    p.broadcaster.broadcast().await.unwrap();
    assert_eq!(
        viewer.frames().last().cloned().unwrap(),
        p.broadcaster.snapshot().await.unwrap()
    );
}

#[tokio::test]
async fn test_join_catch_up_matches_snapshot() {
    let p = pipeline();
    for id in ["a", "b", "c"] {
        p.ingestion
            .handle_message(&format!("devices/{id}/status"), br#"{"lat":1.5,"lon":2.5}"#)
            .await
            .unwrap();
    }

    let state = ViewerState::new(Arc::clone(&p.broadcaster), CancellationToken::new());
    let viewer = Arc::new(RecordingSink::default());
    let (tx, rx) = futures::channel::mpsc::unbounded::<Result<axum::extract::ws::Message, axum::Error>>();
    drop(tx);

    serve_viewer(viewer.clone(), rx, "10.0.0.9".to_string(), &state).await;

    assert_eq!(viewer.frames(), vec![p.broadcaster.snapshot().await.unwrap()]);
    assert_eq!(p.registry.count().await, 0);
}
