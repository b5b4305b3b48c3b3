//! Cache performance monitoring and metrics

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};

use serde::{Deserialize, Serialize};

use crate::tier::Tier;

/// Counters collected by the engine since creation or the last reset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub hits: u64,
    pub misses: u64,
    /// Stores plus retrieves
    pub total_requests: u64,
    pub stores: u64,
    pub failed_stores: u64,
    pub invalidations: u64,
    pub evictions: u64,
    /// Average time to retrieve (milliseconds)
    pub avg_retrieval_time_ms: f64,
    /// Average time to store (milliseconds)
    pub avg_store_time_ms: f64,
}

impl PerformanceStats {
    /// Fraction of retrieves that hit, 0.0 when nothing was retrieved yet
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Per-tier occupancy and hit count
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub enabled: bool,
    pub entries: usize,
    pub size_bytes: u64,
    pub hits: u64,
}

/// Engine statistics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries across all enabled tiers
    pub entries: usize,
    pub size_bytes: u64,
    pub hit_rate: f64,
    pub by_tier: BTreeMap<Tier, TierStats>,
    pub performance: PerformanceStats,
    /// Keys that currently have dependents
    pub tracked_dependencies: usize,
    pub uptime: Duration,
}

/// Thread-safe cache metrics tracker
#[derive(Debug, Clone)]
pub struct CacheMetrics {
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    stores: Arc<AtomicU64>,
    failed_stores: Arc<AtomicU64>,
    invalidations: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
    total_retrieval_time_us: Arc<AtomicU64>,
    total_store_time_us: Arc<AtomicU64>,
    tier_hits: Arc<[AtomicU64; 4]>,
    created_at: SystemTime,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self {
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            stores: Arc::new(AtomicU64::new(0)),
            failed_stores: Arc::new(AtomicU64::new(0)),
            invalidations: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
            total_retrieval_time_us: Arc::new(AtomicU64::new(0)),
            total_store_time_us: Arc::new(AtomicU64::new(0)),
            tier_hits: Arc::new(Default::default()),
            created_at: SystemTime::now(),
        }
    }

    fn tier_slot(tier: Tier) -> usize {
        match tier {
            Tier::Memory => 0,
            Tier::Session => 1,
            Tier::Persistent => 2,
            Tier::Document => 3,
        }
    }

    /// Record a cache hit served by `tier`
    pub fn record_hit(&self, tier: Tier, elapsed: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.tier_hits[Self::tier_slot(tier)].fetch_add(1, Ordering::Relaxed);
        self.total_retrieval_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_miss(&self, elapsed: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.total_retrieval_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a store attempt and whether it landed
    pub fn record_store(&self, elapsed: Duration, stored: bool) {
        self.stores.fetch_add(1, Ordering::Relaxed);
        if !stored {
            self.failed_stores.fetch_add(1, Ordering::Relaxed);
        }
        self.total_store_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn tier_hits(&self, tier: Tier) -> u64 {
        self.tier_hits[Self::tier_slot(tier)].load(Ordering::Relaxed)
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> PerformanceStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let stores = self.stores.load(Ordering::Relaxed);
        let retrievals = hits + misses;

        let average = |total_us: u64, count: u64| {
            if count == 0 {
                0.0
            } else {
                total_us as f64 / count as f64 / 1000.0
            }
        };

        PerformanceStats {
            hits,
            misses,
            total_requests: retrievals + stores,
            stores,
            failed_stores: self.failed_stores.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            avg_retrieval_time_ms: average(
                self.total_retrieval_time_us.load(Ordering::Relaxed),
                retrievals,
            ),
            avg_store_time_ms: average(self.total_store_time_us.load(Ordering::Relaxed), stores),
        }
    }

    pub fn uptime(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.created_at)
            .unwrap_or(Duration::ZERO)
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.stores,
            &self.failed_stores,
            &self.invalidations,
            &self.evictions,
            &self.total_retrieval_time_us,
            &self.total_store_time_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        for counter in self.tier_hits.iter() {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Operation timing helper
#[derive(Debug)]
pub struct OperationTimer {
    start_time: Instant,
}

impl OperationTimer {
    pub fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_is_fraction() {
        let stats = PerformanceStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(PerformanceStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_requests_count_stores_and_retrieves() {
        let metrics = CacheMetrics::new();
        metrics.record_store(Duration::from_millis(2), true);
        metrics.record_store(Duration::from_millis(2), false);
        metrics.record_hit(Tier::Persistent, Duration::from_millis(1));
        metrics.record_miss(Duration::from_millis(1));

        let stats = metrics.snapshot();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.stores, 2);
        assert_eq!(stats.failed_stores, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.avg_store_time_ms - 2.0).abs() < 0.01);
        assert_eq!(metrics.tier_hits(Tier::Persistent), 1);
        assert_eq!(metrics.tier_hits(Tier::Memory), 0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let metrics = CacheMetrics::new();
        metrics.record_hit(Tier::Memory, Duration::from_millis(1));
        metrics.record_invalidation();
        metrics.record_evictions(3);
        metrics.reset();

        assert_eq!(metrics.snapshot(), PerformanceStats::default());
        assert_eq!(metrics.tier_hits(Tier::Memory), 0);
    }

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= Duration::from_millis(10));
    }
}
