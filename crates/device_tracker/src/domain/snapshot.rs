use crate::domain::{with_store_timeout, STORE_TIMEOUT};
use crate::websocket::{BroadcastReport, ConnectionRegistry};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::domain::{BatteryUnit, DeviceRecord, DeviceRepository, DomainResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Message type tag of every snapshot frame
pub const SNAPSHOT_MESSAGE_TYPE: &str = "devices";

/// Viewer-facing shape of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceView {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub speed: f64,
    pub course: f64,
    pub sats: i64,
    pub hdop: f64,
    pub battery: i64,
    pub battery_unit: BatteryUnit,
    pub rssi: f64,
    pub snr: f64,
    pub online: bool,
    /// RFC 3339, always UTC
    pub last_seen: DateTime<Utc>,
}

impl From<&DeviceRecord> for DeviceView {
    fn from(record: &DeviceRecord) -> Self {
        Self {
            id: record.id.clone(),
            lat: record.lat,
            lon: record.lon,
            alt: record.alt,
            speed: record.speed,
            course: record.course,
            sats: record.sats,
            hdop: record.hdop,
            battery: record.battery,
            battery_unit: record.battery_unit,
            rssi: record.rssi,
            snr: record.snr,
            online: record.online,
            last_seen: record.last_seen.with_timezone(&Utc),
        }
    }
}

/// `{"type":"devices","data":[...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: Vec<DeviceView>,
}

impl DeviceSnapshot {
    pub fn from_records(records: &[DeviceRecord]) -> Self {
        Self {
            message_type: SNAPSHOT_MESSAGE_TYPE.to_string(),
            data: records.iter().map(DeviceView::from).collect(),
        }
    }
}

/// Serialize `records` as a snapshot frame, keeping their order
pub fn assemble_snapshot(records: &[DeviceRecord]) -> DomainResult<Bytes> {
    let encoded = serde_json::to_vec(&DeviceSnapshot::from_records(records))?;
    Ok(Bytes::from(encoded))
}

/// Builds full-state snapshots and pushes them to the registry.
///
/// `snapshot()` is the only assembly path: broadcasts and the catch-up frame
/// sent to a joining viewer both go through it.
pub struct SnapshotBroadcaster {
    repository: Arc<dyn DeviceRepository>,
    registry: Arc<ConnectionRegistry>,
    store_timeout: Duration,
}

impl SnapshotBroadcaster {
    pub fn new(repository: Arc<dyn DeviceRepository>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            repository,
            registry,
            store_timeout: STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Current state of every device, most recently seen first
    #[instrument(skip(self))]
    pub async fn snapshot(&self) -> DomainResult<Bytes> {
        let records = with_store_timeout(
            "list_devices",
            self.store_timeout,
            self.repository.list_devices(),
        )
        .await?;

        debug!(devices = records.len(), "assembled snapshot");
        assemble_snapshot(&records)
    }

    /// Send a fresh snapshot to every viewer
    #[instrument(skip(self))]
    pub async fn broadcast(&self) -> DomainResult<BroadcastReport> {
        if self.registry.count().await == 0 {
            debug!("no viewers connected, skipping broadcast");
            return Ok(BroadcastReport::default());
        }

        let payload = self.snapshot().await?;
        Ok(self.registry.broadcast(payload).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::ViewerSink;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use common::domain::{DomainError, InMemoryDeviceRepository, MockDeviceRepository};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl ViewerSink for RecordingSink {
        async fn send(&self, payload: Bytes) -> anyhow::Result<()> {
            self.frames.lock().unwrap().push(payload);
            Ok(())
        }
    }

    fn record(id: &str, last_seen: DateTime<Utc>) -> DeviceRecord {
        DeviceRecord {
            lat: 46.0569,
            lon: 14.5058,
            battery: 3900,
            battery_unit: BatteryUnit::Millivolts,
            online: true,
            ..DeviceRecord::empty(id, last_seen)
        }
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let seen = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let payload = assemble_snapshot(&[record("d1", seen)]).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["type"], "devices");
        let device = &value["data"][0];
        assert_eq!(device["id"], "d1");
        assert_eq!(device["lat"], 46.0569);
        assert_eq!(device["battery"], 3900);
        assert_eq!(device["battery_unit"], "millivolts");
        assert_eq!(device["online"], true);
        assert_eq!(device["last_seen"], "2024-03-01T12:30:00Z");
        assert!(device.get("created_at").is_none());
    }

    #[test]
    fn test_empty_snapshot() {
        let payload = assemble_snapshot(&[]).unwrap();
        assert_eq!(&payload[..], br#"{"type":"devices","data":[]}"#);
    }

    #[tokio::test]
    async fn test_snapshot_orders_most_recent_first() {
        let repo = Arc::new(InMemoryDeviceRepository::new());
        let now = Utc::now();
        repo.upsert_device(record("old", now - ChronoDuration::minutes(10))).await.unwrap();
        repo.upsert_device(record("new", now)).await.unwrap();

        let broadcaster = SnapshotBroadcaster::new(repo, Arc::new(ConnectionRegistry::new()));
        let snapshot: DeviceSnapshot = serde_json::from_slice(&broadcaster.snapshot().await.unwrap()).unwrap();

        let ids: Vec<_> = snapshot.data.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_broadcast_sends_snapshot_to_viewers() {
        let repo = Arc::new(InMemoryDeviceRepository::new());
        repo.upsert_device(record("d1", Utc::now())).await.unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let sink = Arc::new(RecordingSink::default());
        registry.join("browsers", "test", sink.clone()).await;

        let broadcaster = SnapshotBroadcaster::new(repo, registry);
        let report = broadcaster.broadcast().await.unwrap();

        assert_eq!(report.delivered, 1);
        let frames = sink.frames.lock().unwrap().clone();
        assert_eq!(frames, vec![broadcaster.snapshot().await.unwrap()]);
    }

    #[tokio::test]
    async fn test_broadcast_without_viewers_skips_store() {
        let mut mock_repo = MockDeviceRepository::new();
        mock_repo.expect_list_devices().times(0);

        let broadcaster = SnapshotBroadcaster::new(Arc::new(mock_repo), Arc::new(ConnectionRegistry::new()));

        assert_eq!(broadcaster.broadcast().await.unwrap(), BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_list_failure_is_returned() {
        let mut mock_repo = MockDeviceRepository::new();
        mock_repo
            .expect_list_devices()
            .returning(|| Err(DomainError::RepositoryError(anyhow::anyhow!("pool exhausted"))));

        let broadcaster = SnapshotBroadcaster::new(Arc::new(mock_repo), Arc::new(ConnectionRegistry::new()));

        assert!(broadcaster.snapshot().await.is_err());
    }
}
