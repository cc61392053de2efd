//! Forward-only paged queries
//!
//! A paged entry is a list of pages fetched in order, each page carrying
//! the cursor for the next one. A page without a next cursor ends the
//! listing; asking for more after that does nothing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::coalesce::KeyLocks;
use super::{QueryKey, QueryStatus};
use crate::data::{Cursor, Page};
use crate::error::{AppError, Result};
use crate::metrics::{
    CACHE_COALESCED_TOTAL, CACHE_DISCARDED_TOTAL, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL,
};

/// Snapshot of a paged query
#[derive(Debug)]
pub struct PagedState<V> {
    pub status: QueryStatus,
    pub pages: Vec<Arc<Page<V>>>,
    pub has_more: bool,
    pub error: Option<AppError>,
    pub is_fetching: bool,
}

impl<V> PagedState<V> {
    /// All items across pages, in order
    pub fn items(&self) -> impl Iterator<Item = &V> {
        self.pages.iter().flat_map(|page| page.items.iter())
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

impl<V> Clone for PagedState<V> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            pages: self.pages.clone(),
            has_more: self.has_more,
            error: self.error.clone(),
            is_fetching: self.is_fetching,
        }
    }
}

impl<V> Default for PagedState<V> {
    fn default() -> Self {
        Self {
            status: QueryStatus::Idle,
            pages: Vec::new(),
            has_more: true,
            error: None,
            is_fetching: false,
        }
    }
}

struct PagedEntry<V> {
    pages: Vec<Arc<Page<V>>>,
    error: Option<AppError>,
    fetched_at: Option<Instant>,
    fetching: bool,
    invalidated: bool,
    epoch: u64,
    /// Bumped by every stored page
    version: u64,
}

impl<V> PagedEntry<V> {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            error: None,
            fetched_at: None,
            fetching: false,
            invalidated: false,
            epoch: 0,
            version: 0,
        }
    }

    fn has_more(&self) -> bool {
        self.pages.last().is_none_or(|page| !page.is_last())
    }

    fn next_cursor(&self) -> Option<Cursor> {
        self.pages.last().and_then(|page| page.next_cursor.clone())
    }

    fn is_stale(&self, stale_time: Duration) -> bool {
        self.invalidated
            || self.pages.is_empty()
            || self
                .fetched_at
                .is_none_or(|fetched_at| fetched_at.elapsed() >= stale_time)
    }

    fn snapshot(&self) -> PagedState<V> {
        let status = if self.error.is_some() {
            QueryStatus::Error
        } else if !self.pages.is_empty() {
            QueryStatus::Success
        } else if self.fetching {
            QueryStatus::Pending
        } else {
            QueryStatus::Idle
        };

        PagedState {
            status,
            pages: self.pages.clone(),
            has_more: self.has_more(),
            error: self.error.clone(),
            is_fetching: self.fetching,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    First,
    Next,
}

/// Cache of paged queries
pub struct PagedStore<V> {
    name: &'static str,
    entries: Mutex<HashMap<QueryKey, PagedEntry<V>>>,
    locks: KeyLocks,
    stale_time: Duration,
}

impl<V: Send + Sync + 'static> PagedStore<V> {
    pub fn new(name: &'static str, stale_time: Duration) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            locks: KeyLocks::new(),
            stale_time,
        }
    }

    /// Load the first page unless fresh pages are already cached
    ///
    /// A refetch replaces every cached page with the new first page.
    pub async fn fetch_first<F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<PagedState<V>>
    where
        F: FnOnce(Option<Cursor>) -> Fut,
        Fut: Future<Output = Result<Page<V>>>,
    {
        let seen = {
            let entries = self.entries.lock().await;
            match entries.get(key) {
                Some(entry) if !entry.is_stale(self.stale_time) => {
                    CACHE_HITS_TOTAL.with_label_values(&[self.name]).inc();
                    return Ok(entry.snapshot());
                }
                Some(entry) => entry.version,
                None => 0,
            }
        };

        self.load(key, Step::First, seen, fetcher).await
    }

    /// Append the next page
    ///
    /// Loads the first page if nothing is cached or the cache was
    /// invalidated. Once the last page is reached this is a no-op that
    /// returns the current state.
    pub async fn fetch_next<F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<PagedState<V>>
    where
        F: FnOnce(Option<Cursor>) -> Fut,
        Fut: Future<Output = Result<Page<V>>>,
    {
        let (step, seen) = {
            let entries = self.entries.lock().await;
            match entries.get(key) {
                Some(entry) if entry.invalidated || entry.pages.is_empty() => {
                    (Step::First, entry.version)
                }
                Some(entry) if !entry.has_more() => {
                    tracing::debug!(cache = self.name, key = %key, "No more pages");
                    return Ok(entry.snapshot());
                }
                Some(entry) => (Step::Next, entry.version),
                None => (Step::First, 0),
            }
        };

        self.load(key, step, seen, fetcher).await
    }

    async fn load<F, Fut>(
        &self,
        key: &QueryKey,
        step: Step,
        seen: u64,
        fetcher: F,
    ) -> Result<PagedState<V>>
    where
        F: FnOnce(Option<Cursor>) -> Fut,
        Fut: Future<Output = Result<Page<V>>>,
    {
        let _guard = self.locks.acquire(key).await;

        let (step, cursor, epoch, expected_pages) = {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(key.clone()).or_insert_with(PagedEntry::new);

            // Another caller already stored the page we were about to ask for
            if entry.version > seen && !entry.invalidated {
                CACHE_COALESCED_TOTAL.with_label_values(&[self.name]).inc();
                tracing::debug!(cache = self.name, key = %key, "Coalesced with in-flight page fetch");
                return Ok(entry.snapshot());
            }

            // Invalidated while we queued; start over
            let step = if entry.invalidated { Step::First } else { step };

            let cursor = match step {
                Step::First => None,
                Step::Next => match entry.next_cursor() {
                    Some(cursor) => Some(cursor),
                    None => return Ok(entry.snapshot()),
                },
            };
            entry.fetching = true;
            let expected_pages = match step {
                Step::First => 0,
                Step::Next => entry.pages.len(),
            };
            (step, cursor, entry.epoch, expected_pages)
        };

        CACHE_MISSES_TOTAL.with_label_values(&[self.name]).inc();
        tracing::debug!(
            cache = self.name,
            key = %key,
            cursor = ?cursor,
            "Fetching page"
        );

        let result = fetcher(cursor).await;

        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(key) else {
            return result.map(|page| PagedState {
                status: QueryStatus::Success,
                has_more: !page.is_last(),
                pages: vec![Arc::new(page)],
                error: None,
                is_fetching: false,
            });
        };
        entry.fetching = false;

        let current = epoch == entry.epoch
            && match step {
                Step::First => true,
                Step::Next => entry.pages.len() == expected_pages,
            };

        match result {
            Ok(page) => {
                if current {
                    match step {
                        Step::First => entry.pages = vec![Arc::new(page)],
                        Step::Next => entry.pages.push(Arc::new(page)),
                    }
                    entry.error = None;
                    entry.invalidated = false;
                    entry.fetched_at = Some(Instant::now());
                    entry.version += 1;
                } else {
                    CACHE_DISCARDED_TOTAL.with_label_values(&[self.name]).inc();
                    tracing::debug!(cache = self.name, key = %key, "Discarding outdated page");
                }
                Ok(entry.snapshot())
            }
            Err(error) => {
                if current {
                    entry.error = Some(error.clone());
                }
                Err(error)
            }
        }
    }

    /// Whether another page can be fetched
    pub async fn has_more(&self, key: &QueryKey) -> bool {
        let entries = self.entries.lock().await;
        entries.get(key).is_none_or(PagedEntry::has_more)
    }

    pub async fn snapshot(&self, key: &QueryKey) -> PagedState<V> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .map(PagedEntry::snapshot)
            .unwrap_or_default()
    }

    /// Mark stale; the next read starts over from the first page
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

    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.fetching);
        for entry in entries.values_mut() {
            entry.pages.clear();
            entry.error = None;
            entry.fetched_at = None;
            entry.invalidated = true;
            entry.epoch += 1;
        }
    }
}
