//! Facade-level performance metrics

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Running performance figures for facade reads and fetches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Fraction of requests answered from cache, 0.0 to 1.0
    pub hit_rate: f64,
    pub avg_response_time_ms: f64,
    pub total_requests: u64,
    /// Bytes held across all tiers, refreshed by `stats()`
    pub cache_size_bytes: u64,
    pub invalidations: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            hit_rate: 0.0,
            avg_response_time_ms: 0.0,
            total_requests: 0,
            cache_size_bytes: 0,
            invalidations: 0,
            last_updated: Utc::now(),
        }
    }
}

/// Incrementally averaged metrics; no per-request history is kept.
#[derive(Debug, Default)]
pub struct IntegrationMetrics {
    inner: Mutex<PerformanceMetrics>,
}

impl IntegrationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one request into the running hit rate and response time
    pub fn record_request(&self, elapsed: Duration, hit: bool) {
        let mut metrics = self.inner.lock();
        metrics.total_requests += 1;
        let n = metrics.total_requests as f64;

        let hit_value = if hit { 1.0 } else { 0.0 };
        metrics.hit_rate += (hit_value - metrics.hit_rate) / n;

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        metrics.avg_response_time_ms += (elapsed_ms - metrics.avg_response_time_ms) / n;
        metrics.last_updated = Utc::now();
    }

    pub fn record_invalidation(&self) {
        let mut metrics = self.inner.lock();
        metrics.invalidations += 1;
        metrics.last_updated = Utc::now();
    }

    pub fn set_cache_size(&self, bytes: u64) {
        let mut metrics = self.inner.lock();
        metrics.cache_size_bytes = bytes;
        metrics.last_updated = Utc::now();
    }

    pub fn snapshot(&self) -> PerformanceMetrics {
        self.inner.lock().clone()
    }

    pub fn reset(&self) {
        *self.inner.lock() = PerformanceMetrics::default();
    }
}
