use crate::domain::{
    with_store_timeout, SnapshotBroadcaster, DEFAULT_STALE_AFTER_HOURS, DEFAULT_SWEEP_INTERVAL,
    STORE_TIMEOUT,
};
use chrono::Utc;
use common::domain::{DeviceRepository, DomainError, DomainResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Periodically evicts devices that stopped reporting, then rebroadcasts.
pub struct StalenessSweeper {
    repository: Arc<dyn DeviceRepository>,
    broadcaster: Arc<SnapshotBroadcaster>,
    interval: Duration,
    stale_after: chrono::Duration,
    store_timeout: Duration,
}

impl StalenessSweeper {
    pub fn new(repository: Arc<dyn DeviceRepository>, broadcaster: Arc<SnapshotBroadcaster>) -> Self {
        Self {
            repository,
            broadcaster,
            interval: DEFAULT_SWEEP_INTERVAL,
            stale_after: chrono::Duration::hours(DEFAULT_STALE_AFTER_HOURS),
            store_timeout: STORE_TIMEOUT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: chrono::Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// One sweep: bulk delete, then broadcast.
    ///
    /// A failed delete is returned without broadcasting; the next tick retries.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> DomainResult<u64> {
        let cutoff = Utc::now().checked_sub_signed(self.stale_after).ok_or_else(|| {
            DomainError::InvalidConfig(format!(
                "stale_after of {}h is out of range",
                self.stale_after.num_hours()
            ))
        })?;

        let removed = with_store_timeout(
            "delete_stale_devices",
            self.store_timeout,
            self.repository.delete_stale_devices(cutoff),
        )
        .await?;

        if removed > 0 {
            info!(removed, cutoff = %cutoff, "removed stale devices");
        } else {
            debug!(cutoff = %cutoff, "no stale devices");
        }

        if let Err(e) = self.broadcaster.broadcast().await {
            error!(error = %e, "failed to broadcast snapshot after sweep");
        }

        Ok(removed)
    }

    /// Sweep every `interval` until `token` is cancelled.
    ///
    /// The first sweep runs one full interval after start. Cancellation wins
    /// over a due tick, so no sweep begins once shutdown has been requested.
    pub async fn run(&self, token: CancellationToken) -> anyhow::Result<()> {
        if self.interval.is_zero() {
            anyhow::bail!("sweep interval must be greater than zero");
        }

        info!(
            interval_secs = self.interval.as_secs(),
            stale_after_hours = self.stale_after.num_hours(),
            "starting staleness sweeper"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "staleness sweep failed");
                    }
                }
            }
        }

        info!("staleness sweeper stopped");
        Ok(())
    }
}
