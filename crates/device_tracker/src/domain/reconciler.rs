use crate::domain::{with_store_timeout, IdentityLocks, STORE_TIMEOUT};
use chrono::Utc;
use common::domain::{DevicePatch, DeviceRecord, DeviceRepository, DomainResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Merges partial updates into the stored record for an identity.
///
/// Flow:
/// 1. Lock the identity (concurrent updates to one device commit in turn)
/// 2. Read the current record, if any
/// 3. Carry forward every field the patch does not set
/// 4. Write the merged record with a single upsert
pub struct DeviceReconciler {
    repository: Arc<dyn DeviceRepository>,
    locks: IdentityLocks,
    store_timeout: Duration,
}

impl DeviceReconciler {
    pub fn new(repository: Arc<dyn DeviceRepository>) -> Self {
        Self {
            repository,
            locks: IdentityLocks::new(),
            store_timeout: STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Apply `patch` to `device_id` and return the committed record.
    ///
    /// A missing record is the create path, not an error. The result is
    /// always online with `last_seen` set to now.
    #[instrument(skip(self, patch), fields(device_id = %device_id))]
    pub async fn reconcile(&self, device_id: &str, patch: &DevicePatch) -> DomainResult<DeviceRecord> {
        let _guard = self.locks.acquire(device_id).await;

        let prior = with_store_timeout(
            "get_device",
            self.store_timeout,
            self.repository.get_device(device_id),
        )
        .await?;

        if prior.is_none() {
            debug!("first sighting, creating record");
        }

        let merged = patch.apply(device_id, prior.as_ref(), Utc::now());

        with_store_timeout(
            "upsert_device",
            self.store_timeout,
            self.repository.upsert_device(merged),
        )
        .await
    }
}
