use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-identity async locks.
///
/// Holders of the same identity are serialized; different identities never
/// contend beyond the brief map lookup. Entries are dropped as soon as no
/// holder or waiter remains, so the map only tracks identities in flight.
#[derive(Default)]
pub struct IdentityLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `identity`
    pub async fn acquire(&self, identity: &str) -> IdentityGuard<'_> {
        let entry = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                locks
                    .entry(identity.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };

        let guard = entry.lock_owned().await;

        IdentityGuard {
            owner: self,
            identity: identity.to_string(),
            guard: Some(guard),
        }
    }

    /// Identities currently held or awaited
    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct IdentityGuard<'a> {
    owner: &'a IdentityLocks,
    identity: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self.owner.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Waiters hold their own clone, so a count of one means only the map is left.
        let idle = locks
            .get(&self.identity)
            .is_some_and(|entry| Arc::strong_count(entry) == 1);
        if idle {
            locks.remove(&self.identity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_identity_is_serialized() {
        let locks = Arc::new(IdentityLocks::new());
        let first = locks.acquire("d1").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("d1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.unwrap();
        assert_eq!(locks.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_different_identities_do_not_block() {
        let locks = IdentityLocks::new();
        let _a = locks.acquire("a").await;

        let acquired = tokio::time::timeout(Duration::from_millis(50), locks.acquire("b")).await;

        assert!(acquired.is_ok());
        assert_eq!(locks.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_entries_are_released() {
        let locks = IdentityLocks::new();
        {
            let _guard = locks.acquire("d1").await;
            assert_eq!(locks.in_flight(), 1);
        }
        assert_eq!(locks.in_flight(), 0);
    }
}
