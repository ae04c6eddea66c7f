//! Gateway-wide call counters and running response-time means.

use std::sync::{Mutex, MutexGuard, PoisonError};

use mcphub_shared::{BackendStats, Metrics};

/// Thread-safe owner of the [`Metrics`] record.
///
/// Every mutation for one call outcome happens under a single lock, so a
/// snapshot never sees a success counted without its mean update.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    inner: Mutex<Metrics>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a call before its outcome is known
    pub fn record_attempt(&self) {
        self.lock().total_requests += 1;
    }

    /// Record a successful call that took `elapsed_ms`
    pub fn record_success(&self, backend_id: &str, elapsed_ms: u64) {
        let elapsed = elapsed_ms as f64;
        let mut metrics = self.lock();

        metrics.successful_requests += 1;
        let n = metrics.successful_requests as f64;
        metrics.average_response_time_ms += (elapsed - metrics.average_response_time_ms) / n;

        if let Some(stats) = metrics.server_stats.get_mut(backend_id) {
            stats.requests += 1;
            let n = stats.requests as f64;
            stats.average_time_ms += (elapsed - stats.average_time_ms) / n;
        }
    }

    /// Record a failed call
    pub fn record_failure(&self, backend_id: &str) {
        let mut metrics = self.lock();
        metrics.failed_requests += 1;
        if let Some(stats) = metrics.server_stats.get_mut(backend_id) {
            stats.errors += 1;
        }
    }

    /// Create, or reset to zero, the bucket for a freshly connected backend
    pub fn ensure_bucket(&self, backend_id: &str) {
        self.lock()
            .server_stats
            .insert(backend_id.to_string(), BackendStats::default());
    }

    /// Independent copy of the current counters
    pub fn snapshot(&self) -> Metrics {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Metrics> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
