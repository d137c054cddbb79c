//! Prometheus metrics for tier lookups and evictions

use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;
use std::time::Duration;

/// Per-tier Prometheus metrics
#[derive(Clone)]
pub struct TierPrometheusMetrics {
    /// Chunk reads by serving tier (hot, warm, cold, miss)
    pub lookups_total: Arc<CounterVec>,

    /// Chunks leaving a tier (hot: demoted, warm: discarded)
    pub evictions_total: Arc<CounterVec>,

    /// Time spent satisfying a chunk read, by serving tier
    pub fetch_seconds: Arc<HistogramVec>,
}

impl TierPrometheusMetrics {
    /// Create metrics registered on `registry`
    pub fn with_registry(registry: &Registry) -> Result<Self, prometheus::Error> {
        let lookups_total = CounterVec::new(
            Opts::new(
                "tts_chunk_cache_lookups_total",
                "Total number of chunk reads by serving tier",
            ),
            &["tier"], // tier: hot, warm, cold, miss
        )?;
        registry.register(Box::new(lookups_total.clone()))?;

        let evictions_total = CounterVec::new(
            Opts::new(
                "tts_chunk_cache_evictions_total",
                "Total number of chunks evicted from a tier",
            ),
            &["tier"],
        )?;
        registry.register(Box::new(evictions_total.clone()))?;

        let fetch_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tts_chunk_cache_fetch_seconds",
                "Duration of chunk reads in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
            &["source"],
        )?;
        registry.register(Box::new(fetch_seconds.clone()))?;

        Ok(Self {
            lookups_total: Arc::new(lookups_total),
            evictions_total: Arc::new(evictions_total),
            fetch_seconds: Arc::new(fetch_seconds),
        })
    }

    /// Record a chunk read served by `tier` ("miss" when nothing served it)
    pub fn record_lookup(&self, tier: &str, duration: Duration) {
        self.lookups_total.with_label_values(&[tier]).inc();
        self.fetch_seconds
            .with_label_values(&[tier])
            .observe(duration.as_secs_f64());
    }

    /// Record `count` chunks leaving `tier`
    pub fn record_evictions(&self, tier: &str, count: u64) {
        if count > 0 {
            self.evictions_total
                .with_label_values(&[tier])
                .inc_by(count as f64);
        }
    }
}
