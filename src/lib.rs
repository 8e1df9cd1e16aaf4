//! netverdict - Byzantine-fault-tolerant threat scoring for network connections
//!
//! Three independent scoring strategies each produce a signed assessment of
//! every observed destination; a consensus engine takes the median of the
//! signature-valid votes, so one wrong or corrupted scorer cannot move the
//! verdict. Observations enter through a non-blocking queue, are enriched
//! and scored on a worker pool, and finalized verdicts fan out to a recent
//! buffer, a storage collaborator and a dual-stream file exporter.
//!
//! ```no_run
//! use netverdict::{Config, Pipeline};
//! use netverdict::models::{ConnectionObservation, Protocol};
//!
//! # fn main() -> anyhow::Result<()> {
//! let pipeline = Pipeline::new(Config::default())?;
//!
//! pipeline.enqueue(ConnectionObservation::new(
//!     "192.168.1.10".parse()?,
//!     "8.8.8.8".parse()?,
//!     443,
//!     Protocol::Tcp,
//! ))?;
//!
//! let snapshot = pipeline.snapshot();
//! println!("queued: {}", snapshot.queue_depth);
//! pipeline.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consensus;
pub mod engine;
pub mod export;
pub mod intel;
pub mod metrics;
pub mod models;
pub mod scoring;
pub mod signing;
pub mod storage;

pub use config::Config;
pub use consensus::{ConsensusEngine, ConsensusError, ConsensusResult};
pub use engine::{EnqueueError, IngestionQueue, RecentBuffer, WorkerPool};
pub use export::{Exporter, ExporterStats};
pub use intel::{HttpIntelProvider, IntelProvider, StaticIntelProvider};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use models::{ConnectionObservation, FinalizedRecord, ThreatIntel};
pub use scoring::{Assessment, ScorerId, ScoringStrategy};
pub use storage::{MemoryStore, RecordStore};

use anyhow::Result;
use std::sync::Arc;

/// The assembled pipeline: queue, workers, sinks and metrics in one handle.
///
/// Cheap to share by reference; `enqueue` is the only hot-path call and
/// never blocks.
pub struct Pipeline {
    queue: IngestionQueue,
    pool: WorkerPool,
    exporter: Arc<Exporter>,
    recent: Arc<RecentBuffer>,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    /// Assemble with the default collaborators: live HTTP enrichment and
    /// in-memory storage
    pub fn new(config: Config) -> Result<Self> {
        let intel = Arc::new(HttpIntelProvider::new(config.intel.clone())?);
        Self::with_collaborators(config, intel, Arc::new(MemoryStore::new()))
    }

    /// Assemble with caller-supplied enrichment and storage collaborators
    pub fn with_collaborators(
        config: Config,
        intel: Arc<dyn IntelProvider>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        let queue = IngestionQueue::new(config.workers.queue_capacity);
        let exporter = Arc::new(Exporter::new(config.export.clone())?);
        let recent = Arc::new(RecentBuffer::new(config.workers.recent_capacity));
        let metrics = Arc::new(PipelineMetrics::new());

        let pool = WorkerPool::spawn(
            &config,
            queue.clone(),
            scoring::default_scorers(),
            intel,
            store,
            Arc::clone(&exporter),
            Arc::clone(&recent),
            Arc::clone(&metrics),
        )?;

        Ok(Self {
            queue,
            pool,
            exporter,
            recent,
            metrics,
        })
    }

    /// Push one observation onto the queue. Non-blocking, O(1).
    pub fn enqueue(&self, observation: ConnectionObservation) -> Result<(), EnqueueError> {
        self.queue.enqueue(observation)?;
        PipelineMetrics::incr(&self.metrics.enqueued);
        Ok(())
    }

    /// Point-in-time metrics view
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::from_counters(
            &self.metrics,
            self.queue.depth(),
            self.recent.len(),
            self.recent.newest_age_secs(),
            self.pool.scorer_confidence(),
            self.exporter.stats(),
        )
    }

    /// Up to `limit` most recently finalized records, newest last
    pub fn recent(&self, limit: usize) -> Vec<FinalizedRecord> {
        let mut records = self.recent.snapshot();
        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
        records
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Drain within the configured grace period, stop the workers and flush
    /// the exporter
    pub fn shutdown(self) {
        self.pool.shutdown();
        self.exporter.flush();
    }
}
