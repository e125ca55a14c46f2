// Metrics module for Prometheus observability
// Author: kelexine (https://github.com/kelexine)

mod registry;

pub use registry::{
    gather_metrics,
    CACHE_OPERATIONS,
    CACHE_ENTRIES,
    CACHE_BYTES,
    FETCHES,
    FETCH_DURATION,
};

/// Helper to record cache operations (tier: memory, disk)
pub fn record_cache_hit(tier: &str) {
    CACHE_OPERATIONS.with_label_values(&[tier, "hit"]).inc();
}

pub fn record_cache_miss(tier: &str) {
    CACHE_OPERATIONS.with_label_values(&[tier, "miss"]).inc();
}

pub fn record_cache_evictions(tier: &str, count: usize) {
    if count > 0 {
        CACHE_OPERATIONS
            .with_label_values(&[tier, "eviction"])
            .inc_by(count as f64);
    }
}

pub fn record_cache_expired(count: usize) {
    if count > 0 {
        CACHE_OPERATIONS
            .with_label_values(&["disk", "expired"])
            .inc_by(count as f64);
    }
}

pub fn record_cache_clear(tier: &str) {
    CACHE_OPERATIONS.with_label_values(&[tier, "clear"]).inc();
}

pub fn update_tier_size(tier: &str, entries: usize, bytes: u64) {
    CACHE_ENTRIES.with_label_values(&[tier]).set(entries as f64);
    CACHE_BYTES.with_label_values(&[tier]).set(bytes as f64);
}

/// Helper to record fetch outcomes
pub fn record_fetch(outcome: &str, duration_secs: f64) {
    FETCHES.with_label_values(&[outcome]).inc();
    FETCH_DURATION
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

pub fn record_coalesced_request() {
    FETCHES.with_label_values(&["coalesced"]).inc();
}
