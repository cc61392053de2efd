use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::QueryKey;

/// One lock per query key
///
/// Holding a key's guard is what makes a caller the single fetcher for
/// that key; everyone else queues on the same lock and re-checks the
/// cache once they get it. A key's lock lives only while someone holds
/// or waits on it.
pub(crate) struct KeyLocks {
    inflight: Mutex<HashMap<QueryKey, Arc<AsyncMutex<()>>>>,
}

/// Exclusive fetch rights for one key
pub(crate) struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: QueryKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub(crate) fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn acquire(&self, key: &QueryKey) -> KeyGuard<'_> {
        let lock = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                inflight
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        KeyGuard {
            locks: self,
            key: key.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Drop the key's lock unless a waiter still has it
    fn release(&self, key: &QueryKey) {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if inflight
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            inflight.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.key);
    }
}
