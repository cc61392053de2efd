//! Keyed query store
//!
//! Holds the last successful result per [`QueryKey`] and decides when a
//! read may be served from memory. Three rules keep it consistent:
//!
//! - Concurrent reads of one key share a single backend call.
//! - A response is written only if it is newer than the last applied
//!   one and no invalidation happened while it was in flight.
//! - Failures never replace a good value; they are recorded next to it
//!   and handed to callers that queued behind the failed fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::QueryKey;
use super::coalesce::KeyLocks;
use crate::error::{AppError, Result};
use crate::metrics::{
    CACHE_COALESCED_TOTAL, CACHE_DISCARDED_TOTAL, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL,
    CACHE_SIZE,
};

/// Lifecycle of a query as seen by the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Never requested
    Idle,
    /// First fetch in flight, nothing to show yet
    Pending,
    Success,
    Error,
}

/// Snapshot of a query for rendering
#[derive(Debug)]
pub struct QueryState<V> {
    pub status: QueryStatus,
    pub data: Option<Arc<V>>,
    pub error: Option<AppError>,
    pub is_fetching: bool,
    pub is_stale: bool,
}

impl<V> QueryState<V> {
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }
}

impl<V> Clone for QueryState<V> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            is_fetching: self.is_fetching,
            is_stale: self.is_stale,
        }
    }
}

impl<V> Default for QueryState<V> {
    fn default() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            is_fetching: false,
            is_stale: true,
        }
    }
}

struct Entry<V> {
    value: Option<Arc<V>>,
    error: Option<AppError>,
    fetched_at: Option<Instant>,
    last_used: Instant,
    fetching: bool,
    invalidated: bool,
    /// Bumped by every invalidation
    epoch: u64,
    /// Last ticket handed to a fetcher
    issued: u64,
    /// Ticket of the value currently stored
    applied: u64,
    /// Ticket of the last recorded response, value or error
    settled: u64,
    /// Epoch that response was recorded in
    settled_epoch: u64,
}

impl<V> Entry<V> {
    fn new() -> Self {
        Self {
            value: None,
            error: None,
            fetched_at: None,
            last_used: Instant::now(),
            fetching: false,
            invalidated: false,
            epoch: 0,
            issued: 0,
            applied: 0,
            settled: 0,
            settled_epoch: 0,
        }
    }

    fn is_stale(&self, stale_time: Duration) -> bool {
        self.invalidated
            || self
                .fetched_at
                .is_none_or(|fetched_at| fetched_at.elapsed() >= stale_time)
    }

    fn fresh_value(&self, stale_time: Duration) -> Option<Arc<V>> {
        if self.is_stale(stale_time) {
            return None;
        }
        self.value.clone()
    }

    fn snapshot(&self, stale_time: Duration) -> QueryState<V> {
        let status = if self.error.is_some() {
            QueryStatus::Error
        } else if self.value.is_some() {
            QueryStatus::Success
        } else if self.fetching {
            QueryStatus::Pending
        } else {
            QueryStatus::Idle
        };

        QueryState {
            status,
            data: self.value.clone(),
            error: self.error.clone(),
            is_fetching: self.fetching,
            is_stale: self.is_stale(stale_time),
        }
    }
}

/// Cache of single-value queries
pub struct QueryStore<V> {
    name: &'static str,
    entries: Mutex<HashMap<QueryKey, Entry<V>>>,
    locks: KeyLocks,
    stale_time: Duration,
    max_entries: usize,
}

impl<V: Send + Sync + 'static> QueryStore<V> {
    /// Create a store
    ///
    /// # Arguments
    /// * `name` - Label used in logs and metrics
    /// * `stale_time` - How long a fetched value is served without refetching
    /// * `max_entries` - Capacity; the least recently used idle entry is evicted
    pub fn new(name: &'static str, stale_time: Duration, max_entries: usize) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            locks: KeyLocks::new(),
            stale_time,
            max_entries: max_entries.max(1),
        }
    }

    /// Read through the cache
    ///
    /// Serves a fresh value without calling `fetcher`. Otherwise fetches,
    /// sharing the call with any concurrent reader of the same key.
    pub async fn fetch<F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let seen = {
            let mut entries = self.entries.lock().await;
            match entries.get_mut(key) {
                Some(entry) => {
                    entry.last_used = Instant::now();
                    if let Some(value) = entry.fresh_value(self.stale_time) {
                        CACHE_HITS_TOTAL.with_label_values(&[self.name]).inc();
                        tracing::debug!(cache = self.name, key = %key, "Cache hit");
                        return Ok(value);
                    }
                    entry.settled
                }
                None => 0,
            }
        };

        self.load(key, seen, fetcher).await
    }

    async fn load<F, Fut>(&self, key: &QueryKey, seen: u64, fetcher: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let _guard = self.locks.acquire(key).await;

        let (ticket, epoch) = {
            let mut entries = self.entries.lock().await;
            if !entries.contains_key(key) {
                self.evict_if_full(&mut entries);
            }
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);

            // Someone else fetched while we queued
            if entry.settled > seen && entry.settled_epoch == entry.epoch {
                if let Some(error) = entry.error.clone() {
                    CACHE_COALESCED_TOTAL.with_label_values(&[self.name]).inc();
                    tracing::debug!(cache = self.name, key = %key, "Sharing failure of in-flight fetch");
                    return Err(error);
                }
                if let Some(value) = entry.value.clone() {
                    CACHE_COALESCED_TOTAL.with_label_values(&[self.name]).inc();
                    tracing::debug!(cache = self.name, key = %key, "Coalesced with in-flight fetch");
                    return Ok(value);
                }
            }

            entry.issued += 1;
            entry.fetching = true;
            let claimed = (entry.issued, entry.epoch);
            CACHE_SIZE
                .with_label_values(&[self.name])
                .set(entries.len() as i64);
            claimed
        };

        CACHE_MISSES_TOTAL.with_label_values(&[self.name]).inc();
        tracing::debug!(cache = self.name, key = %key, ticket, "Cache miss, fetching");

        let result = fetcher().await;

        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(key) else {
            // Cleared while in flight
            return result.map(Arc::new);
        };
        if entry.issued == ticket {
            entry.fetching = false;
        }

        let current = ticket > entry.settled && epoch == entry.epoch;
        if current {
            entry.settled = ticket;
            entry.settled_epoch = epoch;
        }
        match result {
            Ok(value) => {
                let value = Arc::new(value);
                if current {
                    entry.value = Some(Arc::clone(&value));
                    entry.error = None;
                    entry.fetched_at = Some(Instant::now());
                    entry.invalidated = false;
                    entry.applied = ticket;
                } else {
                    CACHE_DISCARDED_TOTAL.with_label_values(&[self.name]).inc();
                    tracing::debug!(
                        cache = self.name,
                        key = %key,
                        ticket,
                        applied = entry.applied,
                        "Discarding outdated response"
                    );
                }
                Ok(value)
            }
            Err(error) => {
                if current {
                    entry.error = Some(error.clone());
                }
                Err(error)
            }
        }
    }

    /// Mark a key stale; the next read refetches
    ///
    /// Responses already in flight for the key will not be stored.
    pub async fn invalidate(&self, key: &QueryKey) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) => {
                entry.invalidated = true;
                entry.epoch += 1;
                true
            }
            None => false,
        }
    }

    /// Current state of a key
    pub async fn snapshot(&self, key: &QueryKey) -> QueryState<V> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .map(|entry| entry.snapshot(self.stale_time))
            .unwrap_or_default()
    }

    /// Cached value regardless of freshness
    pub async fn peek(&self, key: &QueryKey) -> Option<Arc<V>> {
        let entries = self.entries.lock().await;
        entries.get(key).and_then(|entry| entry.value.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Drop every cached value
    ///
    /// Entries with a fetch in flight stay behind, emptied and invalidated,
    /// so the late response is not written.
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.fetching);
        for entry in entries.values_mut() {
            entry.value = None;
            entry.error = None;
            entry.fetched_at = None;
            entry.invalidated = true;
            entry.epoch += 1;
        }
        CACHE_SIZE
            .with_label_values(&[self.name])
            .set(entries.len() as i64);
    }

    fn evict_if_full(&self, entries: &mut HashMap<QueryKey, Entry<V>>) {
        if entries.len() < self.max_entries {
            return;
        }
        let victim = entries
            .iter()
            .filter(|(_, entry)| !entry.fetching)
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(victim) = victim {
            tracing::debug!(cache = self.name, key = %victim, "Evicting least recently used entry");
            entries.remove(&victim);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn store() -> QueryStore<String> {
        QueryStore::new("test", Duration::from_secs(60), 8)
    }

    #[tokio::test]
    async fn fresh_value_is_served_without_fetching() {
        let store = store();
        let key = QueryKey::RecentPosts;
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = store
                .fetch(&key, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("posts".to_string())
                })
                .await
                .unwrap();
            assert_eq!(*value, "posts");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.snapshot(&key).await.is_success());
    }

    #[tokio::test]
    async fn concurrent_reads_share_one_fetch() {
        let store = store();
        let key = QueryKey::PostById("p1".to_string());
        let calls = AtomicUsize::new(0);

        let fetcher = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok("post".to_string())
        };
        let (a, b, c) = tokio::join!(
            store.fetch(&key, fetcher),
            store.fetch(&key, fetcher),
            store.fetch(&key, fetcher),
        );

        assert_eq!(*a.unwrap(), "post");
        assert_eq!(*b.unwrap(), "post");
        assert_eq!(*c.unwrap(), "post");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queued_readers_share_a_failure() {
        let store = store();
        let key = QueryKey::search("harbor");
        let calls = AtomicUsize::new(0);

        let fetcher = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Err::<String, _>(AppError::Transport("offline".to_string()))
        };
        let (a, b, c) = tokio::join!(
            store.fetch(&key, fetcher),
            store.fetch(&key, fetcher),
            store.fetch(&key, fetcher),
        );

        for result in [a, b, c] {
            assert!(matches!(result, Err(AppError::Transport(_))));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A later read retries
        let value = store
            .fetch(&key, || async { Ok("found".to_string()) })
            .await
            .unwrap();
        assert_eq!(*value, "found");
    }

    #[tokio::test]
    async fn failure_keeps_last_good_value() {
        let store = store();
        let key = QueryKey::CurrentUser;

        store
            .fetch(&key, || async { Ok("ada".to_string()) })
            .await
            .unwrap();
        store.invalidate(&key).await;

        let error = store
            .fetch(&key, || async {
                Err::<String, _>(AppError::Transport("offline".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Transport(_)));

        let state = store.snapshot(&key).await;
        assert_eq!(state.status, QueryStatus::Error);
        assert_eq!(state.data.as_deref().map(String::as_str), Some("ada"));
        assert!(state.is_stale);
    }

    #[tokio::test]
    async fn failed_first_fetch_is_not_cached() {
        let store = store();
        let key = QueryKey::RecentPosts;

        let first = store
            .fetch(&key, || async {
                Err::<String, _>(AppError::Transport("offline".to_string()))
            })
            .await;
        assert!(first.is_err());

        let second = store
            .fetch(&key, || async { Ok("posts".to_string()) })
            .await
            .unwrap();
        assert_eq!(*second, "posts");
    }

    #[tokio::test]
    async fn invalidation_during_fetch_discards_response() {
        let store = Arc::new(store());
        let key = QueryKey::RecentPosts;
        let (release, gate) = oneshot::channel::<()>();

        let in_flight = {
            let store = Arc::clone(&store);
            let key = key.clone();
            tokio::spawn(async move {
                store
                    .fetch(&key, || async move {
                        gate.await.ok();
                        Ok("before-create".to_string())
                    })
                    .await
            })
        };

        // Let the fetch start, then invalidate under it
        while !store.snapshot(&key).await.is_fetching {
            tokio::task::yield_now().await;
        }
        assert!(store.invalidate(&key).await);
        release.send(()).ok();

        let returned = in_flight.await.unwrap().unwrap();
        assert_eq!(*returned, "before-create");
        assert!(store.peek(&key).await.is_none());

        let refreshed = store
            .fetch(&key, || async { Ok("after-create".to_string()) })
            .await
            .unwrap();
        assert_eq!(*refreshed, "after-create");
    }

    #[tokio::test]
    async fn zero_stale_time_always_refetches() {
        let store: QueryStore<u32> = QueryStore::new("test", Duration::ZERO, 8);
        let key = QueryKey::RecentPosts;
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            store
                .fetch(&key, || async {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) as u32)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let store: QueryStore<u32> = QueryStore::new("test", Duration::from_secs(60), 2);

        for term in ["a", "b", "c"] {
            store
                .fetch(&QueryKey::search(term), || async { Ok(1) })
                .await
                .unwrap();
        }

        assert_eq!(store.len().await, 2);
        assert!(store.peek(&QueryKey::search("a")).await.is_none());
        assert!(store.peek(&QueryKey::search("c")).await.is_some());
    }

    #[tokio::test]
    async fn key_locks_are_released_with_evicted_terms() {
        let store: QueryStore<u32> = QueryStore::new("test", Duration::from_secs(60), 4);

        for i in 0..1000 {
            store
                .fetch(&QueryKey::search(&format!("term {}", i)), || async { Ok(i) })
                .await
                .unwrap();
        }

        assert_eq!(store.len().await, 4);
        assert_eq!(store.locks.len(), 0);
    }

    #[tokio::test]
    async fn clear_drops_values() {
        let store = store();
        store
            .fetch(&QueryKey::RecentPosts, || async { Ok("x".to_string()) })
            .await
            .unwrap();
        store.clear().await;
        assert!(store.is_empty().await);
        assert_eq!(
            store.snapshot(&QueryKey::RecentPosts).await.status,
            QueryStatus::Idle
        );
    }
}
