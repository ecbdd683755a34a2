use common::domain::{DomainError, DomainResult};
use std::future::Future;
use std::time::Duration;

/// Upper bound for a single store call
pub const STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for one write to one viewer
pub const VIEWER_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for a whole fan-out to every viewer
pub const BROADCAST_BUDGET: Duration = Duration::from_secs(10);

/// A viewer that sends nothing for this long is treated as gone
pub const VIEWER_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

pub const DEFAULT_STALE_AFTER_HOURS: i64 = 48;

/// Await a store future, failing with `StoreTimeout(operation)` after `timeout`.
pub async fn with_store_timeout<T, F>(operation: &'static str, timeout: Duration, fut: F) -> DomainResult<T>
where
    F: Future<Output = DomainResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(DomainError::StoreTimeout(operation)),
    }
}
