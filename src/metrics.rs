//! Prometheus metrics registry and instruments.
//!
//! Instruments are process-wide; registering them with [`REGISTRY`] is
//! optional and only needed when something scrapes or dumps them.

use lazy_static::lazy_static;
use prometheus::{
    Counter, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Backend Metrics
    pub static ref BACKEND_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_backend_requests_total", "Total number of backend requests"),
        &["operation", "status"]
    ).expect("metric can be created");
    pub static ref BACKEND_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "snapgram_backend_request_duration_seconds",
            "Backend request duration in seconds"
        ).buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["operation"]
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_cache_hits_total", "Total number of cache hits"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_cache_misses_total", "Total number of cache misses"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_COALESCED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_cache_coalesced_total", "Reads served by another caller's in-flight fetch"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_DISCARDED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_cache_discarded_total", "Responses dropped because a newer request or invalidation won"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_INVALIDATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_cache_invalidations_total", "Total number of cache invalidations"),
        &["query_key"]
    ).expect("metric can be created");
    pub static ref CACHE_SIZE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("snapgram_cache_size", "Current number of entries in cache"),
        &["cache_name"]
    ).expect("metric can be created");

    // Storage Metrics
    pub static ref MEDIA_UPLOADS_TOTAL: IntCounter = IntCounter::new(
        "snapgram_media_uploads_total",
        "Total number of media uploads"
    ).expect("metric can be created");
    pub static ref MEDIA_BYTES_UPLOADED: Counter = Counter::new(
        "snapgram_media_bytes_uploaded_total",
        "Total bytes of media uploaded"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("snapgram_errors_total", "Total number of errors"),
        &["error_kind", "operation"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(BACKEND_REQUESTS_TOTAL.clone()),
        Box::new(BACKEND_REQUEST_DURATION_SECONDS.clone()),
        Box::new(CACHE_HITS_TOTAL.clone()),
        Box::new(CACHE_MISSES_TOTAL.clone()),
        Box::new(CACHE_COALESCED_TOTAL.clone()),
        Box::new(CACHE_DISCARDED_TOTAL.clone()),
        Box::new(CACHE_INVALIDATIONS_TOTAL.clone()),
        Box::new(CACHE_SIZE.clone()),
        Box::new(MEDIA_UPLOADS_TOTAL.clone()),
        Box::new(MEDIA_BYTES_UPLOADED.clone()),
        Box::new(ERRORS_TOTAL.clone()),
    ];

    for collector in collectors {
        if let Err(error) = REGISTRY.register(collector) {
            tracing::warn!(%error, "Metric already registered");
        }
    }

    tracing::info!("Metrics registry initialized");
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(error) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(%error, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Time a backend call and count its outcome.
pub(crate) async fn observe_backend<T, F>(operation: &str, call: F) -> crate::error::Result<T>
where
    F: std::future::Future<Output = crate::error::Result<T>>,
{
    let timer = BACKEND_REQUEST_DURATION_SECONDS
        .with_label_values(&[operation])
        .start_timer();
    let result = call.await;
    timer.observe_duration();

    let status = if result.is_ok() { "ok" } else { "error" };
    BACKEND_REQUESTS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
    if let Err(ref error) = result {
        error.record(operation);
    }
    result
}
