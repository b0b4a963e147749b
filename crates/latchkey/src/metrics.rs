//! Prometheus metrics for locks and the cache-aside layer.
//!
//! Recording is always on and costs nothing until a recorder is installed.
//! Call [`init_metrics`] once at startup to collect them and [`render_metrics`]
//! to serve the text exposition format.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Lock metrics
    pub const LOCK_ACQUISITIONS_TOTAL: &str = "lock_acquisitions_total";
    pub const LOCK_WAIT_SECONDS: &str = "lock_wait_seconds";
    pub const LOCK_FALLBACK_TOTAL: &str = "lock_fallback_total";
    pub const LOCK_FORCE_UNLOCKS_TOTAL: &str = "lock_force_unlocks_total";

    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_ERRORS_TOTAL: &str = "cache_errors_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// Lock Metrics
// =============================================================================

/// Record the outcome of one acquisition and how long it waited.
pub fn record_lock_acquisition(backend: &str, acquired: bool, waited: Duration) {
    let outcome = if acquired { "acquired" } else { "timeout" };
    counter!(
        names::LOCK_ACQUISITIONS_TOTAL,
        "backend" => backend.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(names::LOCK_WAIT_SECONDS, "backend" => backend.to_string())
        .record(waited.as_secs_f64());
}

/// Record a switch to the local lock because the lock service did not answer.
pub fn record_lock_fallback() {
    counter!(names::LOCK_FALLBACK_TOTAL).increment(1);
}

/// Record a forced release after unlock retries ran out.
pub fn record_force_unlock() {
    counter!(names::LOCK_FORCE_UNLOCKS_TOTAL).increment(1);
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// Record a cache hit.
pub fn record_cache_hit() {
    counter!(names::CACHE_HITS_TOTAL).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a swallowed cache store error.
pub fn record_cache_error(op: &'static str) {
    counter!(names::CACHE_ERRORS_TOTAL, "op" => op).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_lock_metrics_are_rendered() {
        assert!(init_metrics());
        assert!(!init_metrics());

        record_lock_acquisition("local", true, Duration::from_millis(5));
        record_cache_error("get");

        let rendered = render_metrics().unwrap();
        assert!(rendered.contains(names::LOCK_ACQUISITIONS_TOTAL));
        assert!(rendered.contains("backend=\"local\""));
        assert!(rendered.contains(names::CACHE_ERRORS_TOTAL));
    }
}
