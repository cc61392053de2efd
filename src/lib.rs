//! Snapgram - data access and query cache layer for a photo-sharing client
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - AccountService: sign up, sign in/out, current user       │
//! │  - PostService: post writes, feed, search                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Query Cache                             │
//! │  - Keyed stores with coalescing and invalidation            │
//! │  - Cursor-paged feed                                        │
//! │  - Observers for the presentation layer                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Backend                                │
//! │  - Appwrite REST API (reqwest)                              │
//! │  - In-memory backend                                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `service`: Named account and post operations
//! - `query`: Query keys, caches, mutation invalidation, observers
//! - `backend`: Backend trait and implementations
//! - `storage`: Media upload and cleanup
//! - `data`: Domain models
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus metrics

pub mod backend;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod query;
pub mod service;
pub mod storage;

use std::sync::Arc;

/// Everything a client session needs, wired together
///
/// Cheap to clone; every clone shares the same backend session and caches.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Remote backend
    pub backend: Arc<dyn backend::Backend>,

    /// Query cache shared by the services
    pub queries: Arc<query::QueryClient>,

    /// Media storage on the backend's bucket
    pub storage: Arc<storage::MediaStorage>,

    pub accounts: Arc<service::AccountService>,

    pub posts: Arc<service::PostService>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Validate configuration
    /// 2. Connect the configured backend
    /// 3. Create the query cache and services
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the HTTP client
    /// cannot be built
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        config.validate()?;

        let backend: Arc<dyn backend::Backend> = match config.backend.kind {
            config::BackendKind::Memory => Arc::new(backend::MemoryBackend::new()),
            config::BackendKind::Appwrite => {
                Arc::new(backend::AppwriteBackend::new(&config.backend)?)
            }
        };
        tracing::info!(backend = backend.name(), "Backend ready");

        Ok(Self::with_backend(config, backend))
    }

    /// Build state around an existing backend
    pub fn with_backend(config: config::AppConfig, backend: Arc<dyn backend::Backend>) -> Self {
        let queries = Arc::new(query::QueryClient::new(&config.cache));
        let storage = Arc::new(storage::MediaStorage::new(
            backend.clone(),
            config.media.clone(),
        ));
        let accounts = Arc::new(service::AccountService::new(
            backend.clone(),
            queries.clone(),
        ));
        let posts = Arc::new(service::PostService::new(
            backend.clone(),
            storage.clone(),
            queries.clone(),
            &config.cache,
        ));

        tracing::info!(
            stale_time_seconds = config.cache.stale_time_seconds,
            page_size = config.cache.page_size,
            "Query cache initialized"
        );

        Self {
            config: Arc::new(config),
            backend,
            queries,
            storage,
            accounts,
            posts,
        }
    }
}
