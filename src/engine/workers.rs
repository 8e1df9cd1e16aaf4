//! Worker pool that drives observations through enrichment and consensus
//!
//! Each worker owns nothing: scorers, consensus engine, sinks and counters
//! are shared immutably (or behind their own locks) so any worker can handle
//! any observation. The per-observation sequence is enrich, score, evaluate,
//! finalize, fan out to the recent buffer, the storage collaborator and the
//! exporter. No step on one worker blocks another worker; the three sinks
//! have independent locks so a stalled store still leaves the recent buffer
//! and exporter live.

use anyhow::Context;
use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::consensus::{ConsensusEngine, ConsensusError};
use crate::engine::queue::IngestionQueue;
use crate::engine::recent::RecentBuffer;
use crate::export::Exporter;
use crate::intel::IntelProvider;
use crate::metrics::PipelineMetrics;
use crate::models::{ConnectionObservation, FinalizedRecord, ThreatIntel};
use crate::scoring::ScoringStrategy;
use crate::storage::RecordStore;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything a worker needs, shared across the pool
pub(crate) struct WorkerShared {
    pub queue: IngestionQueue,
    pub scorers: Vec<Box<dyn ScoringStrategy>>,
    pub consensus: ConsensusEngine,
    pub intel: Arc<dyn IntelProvider>,
    pub store: Arc<dyn RecordStore>,
    pub exporter: Arc<Exporter>,
    pub recent: Arc<RecentBuffer>,
    pub metrics: Arc<PipelineMetrics>,
    /// Finish what is queued, then exit
    pub draining: AtomicBool,
    /// Exit now, queued or not
    pub halt: AtomicBool,
}

pub struct WorkerPool {
    shared: Arc<WorkerShared>,
    handles: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl WorkerPool {
    pub fn spawn(
        config: &Config,
        queue: IngestionQueue,
        scorers: Vec<Box<dyn ScoringStrategy>>,
        intel: Arc<dyn IntelProvider>,
        store: Arc<dyn RecordStore>,
        exporter: Arc<Exporter>,
        recent: Arc<RecentBuffer>,
        metrics: Arc<PipelineMetrics>,
    ) -> anyhow::Result<Self> {
        let shared = Arc::new(WorkerShared {
            queue,
            scorers,
            consensus: ConsensusEngine::new(config.consensus.clone()),
            intel,
            store,
            exporter,
            recent,
            metrics,
            draining: AtomicBool::new(false),
            halt: AtomicBool::new(false),
        });

        let count = config.workers.actual_workers();
        let mut handles = Vec::with_capacity(count);
        for i in 0..count {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("verdict-worker-{}", i))
                .spawn(move || worker_loop(shared))
                .with_context(|| format!("Failed to spawn worker thread {}", i))?;
            handles.push(handle);
        }

        info!(workers = count, "worker pool started");
        Ok(Self {
            shared,
            handles,
            grace: Duration::from_secs(config.workers.shutdown_grace_secs),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Running mean confidence per scorer, keyed by scorer name
    pub fn scorer_confidence(&self) -> std::collections::HashMap<String, f64> {
        self.shared
            .scorers
            .iter()
            .map(|s| (s.id().name().to_string(), s.average_confidence()))
            .collect()
    }

    /// Drain the queue for up to the configured grace period, then stop.
    ///
    /// Observations still queued after the grace period are dropped; the
    /// queue depth gauge records how many.
    pub fn shutdown(mut self) {
        self.shared.draining.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + self.grace;
        while self.shared.queue.depth() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }

        let dropped = self.shared.queue.depth();
        if dropped > 0 {
            warn!(dropped, "shutdown grace expired with observations still queued");
        }

        self.shared.halt.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }
        info!("worker pool stopped");
    }
}

fn worker_loop(shared: Arc<WorkerShared>) {
    let receiver = shared.queue.receiver();
    debug!("worker started");

    loop {
        if shared.halt.load(Ordering::SeqCst) {
            break;
        }
        if shared.draining.load(Ordering::SeqCst) && shared.queue.depth() == 0 {
            break;
        }

        match receiver.recv_timeout(RECV_TIMEOUT) {
            Ok(observation) => process_observation(&shared, observation),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("worker stopped");
}

/// One observation end to end. Never fails the pipeline: every error class
/// degrades locally and is counted.
fn process_observation(shared: &WorkerShared, observation: ConnectionObservation) {
    let intel = match shared.intel.lookup(observation.dst_ip) {
        Ok(intel) => intel,
        Err(e) => {
            warn!(dst = %observation.dst_ip, "enrichment failed, using zero intel: {}", e);
            PipelineMetrics::incr(&shared.metrics.enrichment_failures);
            ThreatIntel::default()
        }
    };

    let mut votes = Vec::with_capacity(shared.scorers.len());
    for scorer in &shared.scorers {
        match scorer.score(&observation, &intel) {
            Ok(assessment) => votes.push(assessment),
            Err(e) => warn!(scorer = %scorer.id(), "scorer failed, vote skipped: {}", e),
        }
    }

    let record = match shared.consensus.evaluate(votes, &shared.scorers) {
        Ok(result) => {
            PipelineMetrics::add(&shared.metrics.byzantine_rejections, result.rejected_scorers.len() as u64);
            if result.high_uncertainty {
                PipelineMetrics::incr(&shared.metrics.high_uncertainty);
            }
            if result.is_malicious {
                PipelineMetrics::incr(&shared.metrics.malicious_verdicts);
                info!(
                    dst = %observation.dst_ip,
                    port = observation.dst_port,
                    score = result.consensus_score,
                    "malicious destination"
                );
            }
            FinalizedRecord::from_consensus(observation, intel, result)
        }
        Err(ConsensusError::QuorumNotReached {
            accepted,
            required,
            rejected,
        }) => {
            warn!(
                dst = %observation.dst_ip,
                accepted,
                required,
                "consensus quorum failed, applying fallback score"
            );
            PipelineMetrics::add(&shared.metrics.byzantine_rejections, rejected.len() as u64);
            PipelineMetrics::incr(&shared.metrics.consensus_failures);
            PipelineMetrics::incr(&shared.metrics.fallbacks_applied);
            let cfg = shared.consensus.config();
            FinalizedRecord::fallback(observation, intel, cfg.fallback_score, cfg.malicious_threshold)
        }
    };

    shared.recent.push(record.clone());

    if let Err(e) = shared.store.persist(&record) {
        warn!(id = %record.id, "storage persist failed: {}", e);
        PipelineMetrics::incr(&shared.metrics.storage_failures);
    }

    shared.exporter.export(&record);
    PipelineMetrics::incr(&shared.metrics.finalized);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::export::ExportConfig;
    use crate::intel::StaticIntelProvider;
    use crate::models::Protocol;
    use crate::scoring::default_scorers;
    use crate::storage::MemoryStore;
    use tempfile::TempDir;

    fn pool_fixture(dir: &TempDir, intel: StaticIntelProvider) -> (WorkerPool, IngestionQueue, Arc<MemoryStore>, Arc<RecentBuffer>, Arc<PipelineMetrics>) {
        let mut config = Config::default();
        config.workers.worker_count = 2;
        config.workers.shutdown_grace_secs = 10;

        let queue = IngestionQueue::new(0);
        let store = Arc::new(MemoryStore::new());
        let recent = Arc::new(RecentBuffer::new(16));
        let metrics = Arc::new(PipelineMetrics::new());
        let exporter = Arc::new(
            Exporter::new(ExportConfig {
                output_dir: dir.path().to_path_buf(),
                buffer_size: 1,
                ..Default::default()
            })
            .unwrap(),
        );

        let pool = WorkerPool::spawn(
            &config,
            queue.clone(),
            default_scorers(),
            Arc::new(intel),
            store.clone() as Arc<dyn RecordStore>,
            exporter,
            recent.clone(),
            metrics.clone(),
        )
        .unwrap();
        (pool, queue, store, recent, metrics)
    }

    #[test]
    fn test_observations_flow_to_all_sinks() {
        let dir = TempDir::new().unwrap();
        let (pool, queue, store, recent, metrics) = pool_fixture(&dir, StaticIntelProvider::new());

        for _ in 0..20 {
            queue
                .enqueue(ConnectionObservation::new(
                    "10.0.0.1".parse().unwrap(),
                    "8.8.8.8".parse().unwrap(),
                    443,
                    Protocol::Tcp,
                ))
                .unwrap();
        }

        pool.shutdown();

        assert_eq!(store.len(), 20);
        assert_eq!(recent.len(), 16);
        assert_eq!(metrics.finalized.load(Ordering::Relaxed), 20);
        assert_eq!(metrics.consensus_failures.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_malicious_destination_end_to_end() {
        let dir = TempDir::new().unwrap();
        let bad_ip = "198.51.100.1".parse().unwrap();
        let intel = StaticIntelProvider::new().with_entry(
            bad_ip,
            ThreatIntel {
                vt_flagged_vendors: 15,
                vt_total_vendors: 84,
                abuse_confidence_pct: 95,
                abuse_report_count: 120,
                ..Default::default()
            },
        );
        let (pool, queue, store, _, metrics) = pool_fixture(&dir, intel);

        queue
            .enqueue(ConnectionObservation::new(
                "10.0.0.1".parse().unwrap(),
                bad_ip,
                3389,
                Protocol::Tcp,
            ))
            .unwrap();

        pool.shutdown();

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_malicious);
        assert!(!records[0].used_fallback);
        assert_eq!(metrics.malicious_verdicts.load(Ordering::Relaxed), 1);
    }
}
