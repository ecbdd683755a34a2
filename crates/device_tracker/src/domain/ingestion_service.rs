use crate::domain::{DeviceReconciler, Normalizer, RejectionClass, SnapshotBroadcaster};
use bytes::Bytes;
use common::domain::DeviceRecord;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Entry point for inbound transport messages.
///
/// Flow per message:
/// 1. Normalize `(topic, payload)` into a partial record
/// 2. Reconcile it into the store
/// 3. Broadcast a fresh snapshot to every viewer
///
/// Nothing is returned to the transport; every failure is logged here.
#[derive(Clone)]
pub struct DeviceIngestionService {
    normalizer: Arc<Normalizer>,
    reconciler: Arc<DeviceReconciler>,
    broadcaster: Arc<SnapshotBroadcaster>,
}

impl DeviceIngestionService {
    pub fn new(
        normalizer: Arc<Normalizer>,
        reconciler: Arc<DeviceReconciler>,
        broadcaster: Arc<SnapshotBroadcaster>,
    ) -> Self {
        Self {
            normalizer,
            reconciler,
            broadcaster,
        }
    }

    /// Hand a message off without waiting for it to be stored.
    ///
    /// Work runs on its own task so a slow store or viewer never stalls the
    /// transport's receive loop.
    pub fn on_message(&self, topic: &str, payload: Bytes) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(topic = %topic, error = %e, "no runtime available, dropping message");
                return;
            }
        };

        let service = self.clone();
        let topic = topic.to_string();
        handle.spawn(async move {
            service.handle_message(&topic, &payload).await;
        });
    }

    /// Process one message to completion.
    ///
    /// Each message gets its own root span, independent of the subscriber's.
    /// Returns the committed record, or `None` if the message was dropped.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Option<DeviceRecord> {
        let span = info_span!(
            parent: Span::none(),
            "mqtt_message",
            topic = %topic,
            payload_size = payload.len(),
            device_id = tracing::field::Empty,
        );

        async {
            let update = match self.normalizer.normalize(topic, payload) {
                Ok(update) => update,
                Err(e) => {
                    match e.class() {
                        RejectionClass::Malformed => warn!(error = %e, "dropping malformed message"),
                        RejectionClass::Ignored => debug!(reason = %e, "ignoring message"),
                    }
                    return None;
                }
            };

            Span::current().record("device_id", update.device_id.as_str());

            let record = match self.reconciler.reconcile(&update.device_id, &update.patch).await {
                Ok(record) => record,
                Err(e) => {
                    error!(error = %e, kind = update.kind.as_str(), "failed to persist device update");
                    return None;
                }
            };

            info!(
                kind = update.kind.as_str(),
                lat = record.lat,
                lon = record.lon,
                battery = record.battery,
                battery_unit = %record.battery_unit,
                "device updated"
            );

            match self.broadcaster.broadcast().await {
                Ok(report) => debug!(delivered = report.delivered, "broadcast snapshot"),
                Err(e) => error!(error = %e, "failed to broadcast snapshot"),
            }

            Some(record)
        }
        .instrument(span)
        .await
    }
}
