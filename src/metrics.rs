//! Metrics collection for the audio registry
//!
//! Thread-safe counters using atomic operations. They track where chunk reads
//! were satisfied, tier movements, and absorbed store failures.

use crate::models::StorageLocation;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for the registry
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    // Lookup statistics
    hot_hits: AtomicU64,
    warm_hits: AtomicU64,
    cold_hits: AtomicU64,
    misses: AtomicU64,

    // Tier movements
    promotions: AtomicU64,
    hot_demotions: AtomicU64,
    warm_discards: AtomicU64,

    // Failures absorbed at the tier boundary
    warm_store_errors: AtomicU64,

    // Byte statistics
    bytes_served: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub hot_hits: u64,
    pub warm_hits: u64,
    pub cold_hits: u64,
    pub misses: u64,
    pub promotions: u64,
    pub hot_demotions: u64,
    pub warm_discards: u64,
    pub warm_store_errors: u64,
    pub bytes_served: u64,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful read and the tier that served it
    pub fn record_hit(&self, location: StorageLocation, bytes: usize) {
        match location {
            StorageLocation::Hot => self.hot_hits.fetch_add(1, Ordering::Relaxed),
            StorageLocation::Warm => self.warm_hits.fetch_add(1, Ordering::Relaxed),
            StorageLocation::Cold | StorageLocation::ColdToHot => {
                self.cold_hits.fetch_add(1, Ordering::Relaxed)
            }
        };
        self.bytes_served.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a read that exhausted every tier
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hot_demotions(&self, count: u64) {
        self.hot_demotions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_warm_discards(&self, count: u64) {
        self.warm_discards.fetch_add(count, Ordering::Relaxed);
    }

    /// Store the warm tier's absorbed error total
    pub fn set_warm_store_errors(&self, total: u64) {
        self.warm_store_errors.store(total, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hot_hits: self.hot_hits.load(Ordering::Relaxed),
            warm_hits: self.warm_hits.load(Ordering::Relaxed),
            cold_hits: self.cold_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            hot_demotions: self.hot_demotions.load(Ordering::Relaxed),
            warm_discards: self.warm_discards.load(Ordering::Relaxed),
            warm_store_errors: self.warm_store_errors.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.hot_hits.store(0, Ordering::Relaxed);
        self.warm_hits.store(0, Ordering::Relaxed);
        self.cold_hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.promotions.store(0, Ordering::Relaxed);
        self.hot_demotions.store(0, Ordering::Relaxed);
        self.warm_discards.store(0, Ordering::Relaxed);
        self.warm_store_errors.store(0, Ordering::Relaxed);
        self.bytes_served.store(0, Ordering::Relaxed);
    }
}

impl MetricsSnapshot {
    /// Fraction of reads served by the hot tier
    pub fn hot_hit_rate(&self) -> f64 {
        let total = self.hot_hits + self.warm_hits + self.cold_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hot_hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_hits_by_tier() {
        let metrics = RegistryMetrics::new();
        metrics.record_hit(StorageLocation::Hot, 100);
        metrics.record_hit(StorageLocation::Hot, 100);
        metrics.record_hit(StorageLocation::Warm, 50);
        metrics.record_hit(StorageLocation::ColdToHot, 10);
        metrics.record_miss();

        let stats = metrics.get_stats();
        assert_eq!(stats.hot_hits, 2);
        assert_eq!(stats.warm_hits, 1);
        assert_eq!(stats.cold_hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.bytes_served, 260);
        assert_eq!(stats.hot_hit_rate(), 0.4);
    }

    #[test]
    fn test_hit_rate_no_operations() {
        assert_eq!(MetricsSnapshot::default().hot_hit_rate(), 0.0);
    }

    #[test]
    fn test_reset() {
        let metrics = RegistryMetrics::new();
        metrics.record_promotion();
        metrics.record_hot_demotions(3);
        metrics.record_warm_discards(2);
        metrics.reset();
        assert_eq!(metrics.get_stats(), MetricsSnapshot::default());
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(RegistryMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.record_hit(StorageLocation::Hot, 1);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.get_stats().hot_hits, 800);
    }
}
