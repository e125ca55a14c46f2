// Prometheus metrics registry and collectors
// Author: kelexine (https://github.com/kelexine)

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, HistogramVec, GaugeVec, Opts, Registry, TextEncoder, Encoder,
    register_counter_vec_with_registry, register_histogram_vec_with_registry,
    register_gauge_vec_with_registry,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // CACHE METRICS
    // ============================================================================

    /// Cache operations per tier
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("image_cache_operations_total", "Total image cache operations"),
        &["tier", "operation"], // operation: hit, miss, eviction, clear, expired
        REGISTRY
    ).unwrap();

    /// Current entries per tier
    pub static ref CACHE_ENTRIES: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("image_cache_entries", "Current number of image cache entries"),
        &["tier"],
        REGISTRY
    ).unwrap();

    /// Current bytes per tier
    pub static ref CACHE_BYTES: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("image_cache_bytes", "Current bytes held by the image cache"),
        &["tier"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // FETCH METRICS
    // ============================================================================

    /// Network fetches by outcome
    pub static ref FETCHES: CounterVec = register_counter_vec_with_registry!(
        Opts::new("image_fetches_total", "Total image fetches"),
        &["outcome"], // outcome: success, fetch_error, decode_error, coalesced
        REGISTRY
    ).unwrap();

    /// Fetch + decode duration
    pub static ref FETCH_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("image_fetch_duration_seconds", "Image fetch and decode duration")
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["outcome"],
        REGISTRY
    ).unwrap();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
