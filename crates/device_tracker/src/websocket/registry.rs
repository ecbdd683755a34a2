use crate::domain::{BROADCAST_BUDGET, VIEWER_WRITE_TIMEOUT};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

pub type ViewerId = u64;

/// Outbound half of one viewer connection
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ViewerSink: Send + Sync {
    /// Write one text frame carrying `payload`
    async fn send(&self, payload: Bytes) -> anyhow::Result<()>;
}

struct Viewer {
    id: ViewerId,
    client: String,
    sink: Arc<dyn ViewerSink>,
}

/// Tally of one fan-out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Writes still in flight when the overall budget ran out
    pub abandoned: usize,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed + self.timed_out + self.abandoned
    }
}

/// Live viewers grouped by label.
///
/// The lock only guards structural changes and taking a copy of the target
/// list. Writes happen after it is released, so a stalled viewer never blocks
/// `join`, `leave` or another broadcast. Failed writes are logged and the
/// viewer stays registered; its own read loop is responsible for leaving.
pub struct ConnectionRegistry {
    viewers: RwLock<HashMap<String, Vec<Viewer>>>,
    next_id: AtomicU64,
    write_timeout: Duration,
    broadcast_budget: Duration,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_timeouts(VIEWER_WRITE_TIMEOUT, BROADCAST_BUDGET)
    }

    pub fn with_timeouts(write_timeout: Duration, broadcast_budget: Duration) -> Self {
        Self {
            viewers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            write_timeout,
            broadcast_budget,
        }
    }

    pub async fn join(
        &self,
        label: &str,
        client: impl Into<String>,
        sink: Arc<dyn ViewerSink>,
    ) -> ViewerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let client = client.into();

        let (connected, total) = {
            let mut viewers = self.viewers.write().await;
            viewers.entry(label.to_string()).or_default().push(Viewer {
                id,
                client: client.clone(),
                sink,
            });
            (viewers.get(label).map_or(0, Vec::len), total_viewers(&viewers))
        };

        info!(viewer_id = id, label, client = %client, connected, total, "viewer joined");
        id
    }

    /// Remove a viewer; returns false if it was already gone
    pub async fn leave(&self, id: ViewerId) -> bool {
        let mut viewers = self.viewers.write().await;

        let Some((label, position)) = viewers.iter().find_map(|(label, list)| {
            list.iter()
                .position(|viewer| viewer.id == id)
                .map(|position| (label.clone(), position))
        }) else {
            return false;
        };

        let mut connected = 0;
        if let Some(list) = viewers.get_mut(&label) {
            let viewer = list.swap_remove(position);
            connected = list.len();
            debug!(client = %viewer.client, "removing viewer");
        }
        if connected == 0 {
            viewers.remove(&label);
        }
        let total = total_viewers(&viewers);

        info!(viewer_id = id, label = %label, connected, total, "viewer left");
        true
    }

    /// Viewers across every label at the moment of the call
    pub async fn count(&self) -> usize {
        total_viewers(&*self.viewers.read().await)
    }

    /// Send `payload` to every registered viewer in parallel.
    #[instrument(skip(self, payload), fields(payload_size = payload.len()))]
    pub async fn broadcast(&self, payload: Bytes) -> BroadcastReport {
        let targets: Vec<(ViewerId, String, Arc<dyn ViewerSink>)> = {
            let viewers = self.viewers.read().await;
            viewers
                .values()
                .flatten()
                .map(|viewer| (viewer.id, viewer.client.clone(), Arc::clone(&viewer.sink)))
                .collect()
        };

        let mut report = BroadcastReport::default();
        if targets.is_empty() {
            return report;
        }

        let total = targets.len();
        let write_timeout = self.write_timeout;
        let mut pending: FuturesUnordered<_> = targets
            .into_iter()
            .map(|(id, client, sink)| {
                let payload = payload.clone();
                async move {
                    let outcome = tokio::time::timeout(write_timeout, sink.send(payload)).await;
                    (id, client, outcome)
                }
            })
            .collect();

        let drain = async {
            while let Some((id, client, outcome)) = pending.next().await {
                match outcome {
                    Ok(Ok(())) => report.delivered += 1,
                    Ok(Err(e)) => {
                        warn!(viewer_id = id, client = %client, error = %e, "failed to deliver snapshot");
                        report.failed += 1;
                    }
                    Err(_) => {
                        warn!(viewer_id = id, client = %client, "snapshot write timed out");
                        report.timed_out += 1;
                    }
                }
            }
        };
        let finished = tokio::time::timeout(self.broadcast_budget, drain).await.is_ok();

        if !finished {
            report.abandoned = total - report.delivered - report.failed - report.timed_out;
            warn!(
                abandoned = report.abandoned,
                budget_secs = self.broadcast_budget.as_secs(),
                "broadcast budget elapsed, abandoning unfinished writes"
            );
        }

        debug!(
            delivered = report.delivered,
            failed = report.failed,
            timed_out = report.timed_out,
            "broadcast complete"
        );
        report
    }
}

fn total_viewers(viewers: &HashMap<String, Vec<Viewer>>) -> usize {
    viewers.values().map(Vec::len).sum()
}
