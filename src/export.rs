//! Dual-stream verdict export
//!
//! Every finalized record is written twice: a self-contained JSON line in
//! the detailed stream (append-only ground truth, daily rotation) and a
//! flattened row in the summary CSV (size rotation). Both streams share one
//! lock so output line ordering matches flush-call ordering.
//!
//! The exporter never deduplicates: exporting the same record twice yields
//! two lines.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::models::FinalizedRecord;
use crate::scoring::ScorerId;

const CSV_HEADER: &str = "timestamp,dstIP,dstPort,consensusScore,confidence,highUncertainty";

/// Export stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory holding both streams
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Records buffered in memory before an automatic flush
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Summary CSV rotates once it grows past this many bytes
    #[serde(default = "default_csv_max_bytes")]
    pub csv_max_bytes: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("verdicts")
}

fn default_buffer_size() -> usize {
    100
}

fn default_csv_max_bytes() -> u64 {
    10 * 1024 * 1024
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            buffer_size: default_buffer_size(),
            csv_max_bytes: default_csv_max_bytes(),
        }
    }
}

/// Counters surfaced through the metrics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterStats {
    pub records_exported: u64,
    /// Records currently buffered and not yet durably written
    pub buffered: usize,
    pub rotations: u64,
    pub write_failures: u64,
}

struct ExporterState {
    buffer: Vec<FinalizedRecord>,
    /// Buffer index up to which the detailed stream is durably written.
    /// Tracked per stream so a retry after a partial failure never
    /// re-appends lines a stream already has.
    jsonl_flushed: usize,
    /// Buffer index up to which the summary CSV is durably written
    csv_flushed: usize,
    /// UTC date of the last detailed-stream write, for rotation counting
    last_jsonl_date: Option<String>,
    records_exported: u64,
    rotations: u64,
    write_failures: u64,
}

/// Buffered dual-stream writer, shared across workers behind one lock
pub struct Exporter {
    config: ExportConfig,
    state: Mutex<ExporterState>,
}

impl Exporter {
    pub fn new(config: ExportConfig) -> Result<Self> {
        fs::create_dir_all(&config.output_dir).with_context(|| {
            format!("Failed to create export directory: {}", config.output_dir.display())
        })?;

        Ok(Self {
            config,
            state: Mutex::new(ExporterState {
                buffer: Vec::new(),
                jsonl_flushed: 0,
                csv_flushed: 0,
                last_jsonl_date: None,
                records_exported: 0,
                rotations: 0,
                write_failures: 0,
            }),
        })
    }

    /// Buffer one record, flushing automatically once the buffer fills.
    ///
    /// Write failures are absorbed: the buffer is retained for the next
    /// flush attempt and the failure surfaces through [`Exporter::stats`].
    pub fn export(&self, record: &FinalizedRecord) {
        let mut state = self.state.lock();
        state.buffer.push(record.clone());

        if state.buffer.len() >= self.config.buffer_size {
            self.flush_locked(&mut state);
        }
    }

    /// Force a durable write of everything buffered
    pub fn flush(&self) {
        let mut state = self.state.lock();
        self.flush_locked(&mut state);
    }

    pub fn stats(&self) -> ExporterStats {
        let state = self.state.lock();
        ExporterStats {
            records_exported: state.records_exported,
            buffered: state.buffer.len(),
            rotations: state.rotations,
            write_failures: state.write_failures,
        }
    }

    fn flush_locked(&self, state: &mut ExporterState) {
        if state.buffer.is_empty() {
            return;
        }

        let count = state.buffer.len();
        match self.write_batch(state) {
            Ok(()) => {
                state.buffer.clear();
                state.jsonl_flushed = 0;
                state.csv_flushed = 0;
                state.records_exported += count as u64;
                debug!(records = count, "flushed verdict export");
            }
            Err(e) => {
                state.write_failures += 1;
                warn!(records = count, "export flush failed, retaining buffer: {}", e);
            }
        }
    }

    /// Write each stream's unwritten suffix, advancing that stream's cursor
    /// on success. A failure in one stream leaves the other's cursor where
    /// it is, so the retry repeats only the stream that failed.
    fn write_batch(&self, state: &mut ExporterState) -> Result<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let jsonl_path = self.config.output_dir.join(format!("verdicts-{}.jsonl", today));
        let csv_path = self.config.output_dir.join("verdicts-summary.csv");

        if let Some(ref last) = state.last_jsonl_date {
            if *last != today {
                state.rotations += 1;
            }
        }
        state.last_jsonl_date = Some(today);

        if state.jsonl_flushed < state.buffer.len() {
            let mut jsonl = String::new();
            for record in &state.buffer[state.jsonl_flushed..] {
                let line = DetailLine::from_record(record);
                jsonl.push_str(&serde_json::to_string(&line)?);
                jsonl.push('\n');
            }
            append(&jsonl_path, &jsonl)?;
            state.jsonl_flushed = state.buffer.len();
        }

        if state.csv_flushed < state.buffer.len() {
            if self.rotate_csv_if_needed(&csv_path)? {
                state.rotations += 1;
            }

            let mut csv = String::new();
            let needs_header = !csv_path.exists()
                || fs::metadata(&csv_path).map(|m| m.len() == 0).unwrap_or(true);
            if needs_header {
                csv.push_str(CSV_HEADER);
                csv.push('\n');
            }
            for record in &state.buffer[state.csv_flushed..] {
                csv.push_str(&summary_row(record));
                csv.push('\n');
            }
            append(&csv_path, &csv)?;
            state.csv_flushed = state.buffer.len();
        }

        Ok(())
    }

    /// Rename the summary CSV aside once it exceeds the size cap
    fn rotate_csv_if_needed(&self, csv_path: &Path) -> Result<bool> {
        let size = match fs::metadata(csv_path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(false),
        };

        if size < self.config.csv_max_bytes {
            return Ok(false);
        }

        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let rotated = self
            .config
            .output_dir
            .join(format!("verdicts-summary-{}.csv", stamp));
        fs::rename(csv_path, &rotated)
            .with_context(|| format!("Failed to rotate summary CSV to {}", rotated.display()))?;
        Ok(true)
    }
}

impl Drop for Exporter {
    fn drop(&mut self) {
        self.flush();
    }
}

fn append(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.flush()?;
    Ok(())
}

fn summary_row(record: &FinalizedRecord) -> String {
    let confidence = record
        .consensus
        .as_ref()
        .map(|c| c.confidence)
        .unwrap_or(0.0);
    let high_uncertainty = record
        .consensus
        .as_ref()
        .map(|c| c.high_uncertainty)
        .unwrap_or(false);
    format!(
        "{:.6},{},{},{:.4},{:.4},{}",
        record.observation.timestamp,
        record.observation.dst_ip,
        record.observation.dst_port,
        record.final_score,
        confidence,
        high_uncertainty
    )
}

// Detailed-stream wire shape. Field names are a stable external contract,
// frozen independently of the internal structs.

#[derive(Debug, Serialize, Deserialize)]
struct DetailLine {
    timestamp: f64,
    #[serde(rename = "isoTime")]
    iso_time: String,
    #[serde(rename = "dstIP")]
    dst_ip: String,
    #[serde(rename = "dstPort")]
    dst_port: u16,
    protocol: String,
    consensus: Option<ConsensusWire>,
    #[serde(rename = "finalScore")]
    final_score: f64,
    #[serde(rename = "usedFallback")]
    used_fallback: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConsensusWire {
    #[serde(rename = "consensusScore")]
    consensus_score: f64,
    confidence: f64,
    #[serde(rename = "highUncertainty")]
    high_uncertainty: bool,
    method: String,
    votes: Vec<VoteWire>,
    outliers: Vec<String>,
    metadata: ConsensusMetadataWire,
    #[serde(rename = "isMalicious")]
    is_malicious: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct VoteWire {
    #[serde(rename = "scorerID")]
    scorer_id: String,
    score: f64,
    confidence: f64,
    reasoning: String,
    timestamp: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConsensusMetadataWire {
    #[serde(rename = "numScorers")]
    num_scorers: usize,
    #[serde(rename = "numOutliers")]
    num_outliers: usize,
    #[serde(rename = "scoreSpread")]
    score_spread: f64,
    #[serde(rename = "medianScore")]
    median_score: f64,
    #[serde(rename = "minScore")]
    min_score: f64,
    #[serde(rename = "maxScore")]
    max_score: f64,
}

impl DetailLine {
    fn from_record(record: &FinalizedRecord) -> Self {
        Self {
            timestamp: record.observation.timestamp,
            iso_time: record.finalized_at.to_rfc3339(),
            dst_ip: record.observation.dst_ip.to_string(),
            dst_port: record.observation.dst_port,
            protocol: record.observation.protocol.to_string(),
            consensus: record.consensus.as_ref().map(|c| ConsensusWire {
                consensus_score: c.consensus_score,
                confidence: c.confidence,
                high_uncertainty: c.high_uncertainty,
                method: c.method.clone(),
                votes: c
                    .votes
                    .iter()
                    .map(|v| VoteWire {
                        scorer_id: v.scorer_id.name().to_string(),
                        score: v.score,
                        confidence: v.confidence,
                        reasoning: v.reasoning.clone(),
                        timestamp: v.timestamp,
                    })
                    .collect(),
                outliers: c
                    .outlier_scorers
                    .iter()
                    .map(|id: &ScorerId| id.name().to_string())
                    .collect(),
                metadata: ConsensusMetadataWire {
                    num_scorers: c.num_accepted,
                    num_outliers: c.num_outliers,
                    score_spread: c.score_spread,
                    median_score: c.median_score,
                    min_score: c.min_score,
                    max_score: c.max_score,
                },
                is_malicious: c.is_malicious,
            }),
            final_score: record.final_score,
            used_fallback: record.used_fallback,
        }
    }
}
