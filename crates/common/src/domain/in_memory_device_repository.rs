use crate::domain::{DeviceRecord, DeviceRepository, DomainResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory implementation of DeviceRepository using HashMap
///
/// State lives only as long as the process; used when no database is
/// configured and in tests.
#[derive(Clone)]
pub struct InMemoryDeviceRepository {
    devices: Arc<RwLock<HashMap<String, DeviceRecord>>>,
}

impl InMemoryDeviceRepository {
    pub fn new() -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryDeviceRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceRepository for InMemoryDeviceRepository {
    async fn upsert_device(&self, mut record: DeviceRecord) -> DomainResult<DeviceRecord> {
        let mut devices = self.devices.write().await;
        if let Some(existing) = devices.get(&record.id) {
            record.created_at = existing.created_at;
        }
        devices.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_device(&self, device_id: &str) -> DomainResult<Option<DeviceRecord>> {
        let devices = self.devices.read().await;
        Ok(devices.get(device_id).cloned())
    }

    async fn list_devices(&self) -> DomainResult<Vec<DeviceRecord>> {
        let devices = self.devices.read().await;
        let mut records: Vec<DeviceRecord> = devices.values().cloned().collect();
        drop(devices);

        records.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn delete_stale_devices(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let mut devices = self.devices.write().await;
        let before = devices.len();
        devices.retain(|_, record| record.last_seen >= cutoff);
        let removed = (before - devices.len()) as u64;
        debug!(removed, cutoff = %cutoff, "deleted stale devices");
        Ok(removed)
    }
}
