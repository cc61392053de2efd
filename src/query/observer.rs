//! Hook-like observers for the presentation layer
//!
//! An observer is a slot a view binds to. It publishes state through a
//! `watch` channel, so a view re-renders whenever the status changes.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use super::{QueryState, QueryStatus};
use crate::error::{AppError, Result};

/// Query slot with last-request-wins publishing
///
/// Every `run` takes a ticket. Only the newest ticket may publish, so a
/// slow response for a superseded request (an old search term, say) never
/// replaces what the view shows for the current one.
pub struct QueryObserver<V> {
    state: watch::Sender<QueryState<V>>,
    latest: AtomicU64,
}

impl<V: Send + Sync + 'static> QueryObserver<V> {
    pub fn new() -> Self {
        let (state, _) = watch::channel(QueryState::default());
        Self {
            state,
            latest: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState<V>> {
        self.state.subscribe()
    }

    /// Current state
    pub fn state(&self) -> QueryState<V> {
        self.state.borrow().clone()
    }

    /// Drive one request through the slot
    ///
    /// The result is always returned to the caller, published or not.
    pub async fn run<Fut>(&self, request: Fut) -> Result<Arc<V>>
    where
        Fut: Future<Output = Result<Arc<V>>>,
    {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|state| {
            state.is_fetching = true;
            if state.data.is_none() && state.error.is_none() {
                state.status = QueryStatus::Pending;
            }
        });

        let result = request.await;

        let published = self.state.send_if_modified(|state| {
            if self.latest.load(Ordering::SeqCst) != ticket {
                return false;
            }
            state.is_fetching = false;
            state.is_stale = false;
            match &result {
                Ok(value) => {
                    state.status = QueryStatus::Success;
                    state.data = Some(Arc::clone(value));
                    state.error = None;
                }
                Err(error) => {
                    state.status = QueryStatus::Error;
                    state.error = Some(error.clone());
                }
            }
            true
        });
        if !published {
            tracing::debug!(ticket, "Dropping superseded response");
        }

        result
    }

    /// Publish a value without a request (e.g. an empty search)
    ///
    /// Supersedes anything in flight.
    pub fn set(&self, value: Arc<V>) {
        self.latest.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(QueryState {
            status: QueryStatus::Success,
            data: Some(value),
            error: None,
            is_fetching: false,
            is_stale: false,
        });
    }

    /// Back to idle; supersedes anything in flight
    pub fn reset(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(QueryState::default());
    }
}

impl<V: Send + Sync + 'static> Default for QueryObserver<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of a mutation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Idle,
    Pending,
    Success,
    Error,
}

/// Snapshot of a mutation slot
#[derive(Debug)]
pub struct MutationState<T> {
    pub status: MutationStatus,
    pub data: Option<Arc<T>>,
    pub error: Option<AppError>,
}

impl<T> MutationState<T> {
    pub fn is_pending(&self) -> bool {
        self.status == MutationStatus::Pending
    }
}

impl<T> Clone for MutationState<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
        }
    }
}

impl<T> Default for MutationState<T> {
    fn default() -> Self {
        Self {
            status: MutationStatus::Idle,
            data: None,
            error: None,
        }
    }
}

/// Mutation slot (submit buttons, forms)
pub struct MutationObserver<T> {
    state: watch::Sender<MutationState<T>>,
}

impl<T: Send + Sync + 'static> MutationObserver<T> {
    pub fn new() -> Self {
        let (state, _) = watch::channel(MutationState::default());
        Self { state }
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationState<T>> {
        self.state.subscribe()
    }

    pub fn state(&self) -> MutationState<T> {
        self.state.borrow().clone()
    }

    /// Run a mutation, publishing pending then the outcome
    pub async fn mutate<Fut>(&self, mutation: Fut) -> Result<Arc<T>>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.state.send_replace(MutationState {
            status: MutationStatus::Pending,
            data: None,
            error: None,
        });

        let result = mutation.await.map(Arc::new);
        self.state.send_replace(match &result {
            Ok(value) => MutationState {
                status: MutationStatus::Success,
                data: Some(Arc::clone(value)),
                error: None,
            },
            Err(error) => MutationState {
                status: MutationStatus::Error,
                data: None,
                error: Some(error.clone()),
            },
        });
        result
    }

    pub fn reset(&self) {
        self.state.send_replace(MutationState::default());
    }
}

impl<T: Send + Sync + 'static> Default for MutationObserver<T> {
    fn default() -> Self {
        Self::new()
    }
}
