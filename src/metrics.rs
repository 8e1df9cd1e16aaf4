//! Pipeline counters and the read-only metrics snapshot

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::export::ExporterStats;

/// Shared counters, incremented lock-free from any worker
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub enqueued: AtomicU64,
    pub finalized: AtomicU64,
    pub enrichment_failures: AtomicU64,
    pub byzantine_rejections: AtomicU64,
    pub consensus_failures: AtomicU64,
    pub fallbacks_applied: AtomicU64,
    pub high_uncertainty: AtomicU64,
    pub malicious_verdicts: AtomicU64,
    pub storage_failures: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Point-in-time view of the whole pipeline, safe to serialize and ship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub finalized: u64,
    pub queue_depth: usize,
    pub recent_buffer_occupancy: usize,
    /// Age in seconds of the newest finalized record, when any exists
    pub recent_buffer_age_secs: Option<f64>,
    pub enrichment_failures: u64,
    pub byzantine_rejections: u64,
    pub consensus_failures: u64,
    pub fallbacks_applied: u64,
    pub high_uncertainty: u64,
    pub malicious_verdicts: u64,
    pub storage_failures: u64,
    /// Running mean confidence per scorer, keyed by scorer name
    pub scorer_confidence: HashMap<String, f64>,
    pub exporter: ExporterStats,
}

impl MetricsSnapshot {
    pub fn from_counters(
        metrics: &PipelineMetrics,
        queue_depth: usize,
        recent_buffer_occupancy: usize,
        recent_buffer_age_secs: Option<f64>,
        scorer_confidence: HashMap<String, f64>,
        exporter: ExporterStats,
    ) -> Self {
        Self {
            enqueued: metrics.enqueued.load(Ordering::Relaxed),
            finalized: metrics.finalized.load(Ordering::Relaxed),
            queue_depth,
            recent_buffer_occupancy,
            recent_buffer_age_secs,
            enrichment_failures: metrics.enrichment_failures.load(Ordering::Relaxed),
            byzantine_rejections: metrics.byzantine_rejections.load(Ordering::Relaxed),
            consensus_failures: metrics.consensus_failures.load(Ordering::Relaxed),
            fallbacks_applied: metrics.fallbacks_applied.load(Ordering::Relaxed),
            high_uncertainty: metrics.high_uncertainty.load(Ordering::Relaxed),
            malicious_verdicts: metrics.malicious_verdicts.load(Ordering::Relaxed),
            storage_failures: metrics.storage_failures.load(Ordering::Relaxed),
            scorer_confidence,
            exporter,
        }
    }
}
