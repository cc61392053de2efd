//! Snapgram binary entry point
//!
//! Runs the read-only queries once against the configured backend and
//! logs what came back. An optional argument is used as a search term.

use anyhow::Context;
use snapgram::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging
/// 3. Initialize AppState
/// 4. Query current user, first feed page and search
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration
    let config = config::AppConfig::load().context("failed to load configuration")?;

    // 2. Initialize tracing/logging
    let default_filter = format!("snapgram={}", config.logging.level);
    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter.clone().into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter.clone().into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting Snapgram...");
    snapgram::metrics::init_metrics();
    tracing::info!(backend = ?config.backend.kind, "Configuration loaded");

    // 3. Initialize application state
    let state = AppState::new(config).context("failed to initialize application state")?;

    // 4. Read-only queries
    match state.accounts.current_user().await {
        Some(user) => tracing::info!(username = %user.username, "Signed in"),
        None => tracing::info!("No current user"),
    }

    match state.posts.fetch_feed().await {
        Ok(feed) => tracing::info!(
            posts = feed.items().count(),
            has_more = feed.has_more,
            "Loaded feed"
        ),
        Err(error) => tracing::error!(%error, kind = error.kind().as_str(), "Feed failed"),
    }

    if let Some(term) = std::env::args().nth(1) {
        match state.posts.search_posts(&term).await {
            Ok(posts) => tracing::info!(term = %term, results = posts.len(), "Search finished"),
            Err(error) => tracing::error!(%error, term = %term, "Search failed"),
        }
    }

    tracing::debug!(metrics = %snapgram::metrics::gather_text(), "Metrics");
    Ok(())
}
