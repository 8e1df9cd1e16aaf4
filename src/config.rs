use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::export::ExportConfig;
use crate::intel::IntelConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub consensus: ConsensusConfig,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub intel: IntelConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or fall back to defaults
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/netverdict/config.toml"),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }
}

/// Consensus algorithm tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Minimum signature-valid votes required for a verdict
    #[serde(default = "default_min_scorers")]
    pub min_scorers: usize,

    /// A vote further than this from the median is flagged as an outlier
    #[serde(default = "default_outlier_threshold")]
    pub outlier_threshold: f64,

    /// Score spread beyond this sets the high-uncertainty flag
    #[serde(default = "default_uncertainty_threshold")]
    pub uncertainty_threshold: f64,

    /// Consensus score beyond this marks the destination malicious
    #[serde(default = "default_malicious_threshold")]
    pub malicious_threshold: f64,

    /// Conservative score applied when quorum fails
    #[serde(default = "default_fallback_score")]
    pub fallback_score: f64,
}

fn default_min_scorers() -> usize {
    2
}

fn default_outlier_threshold() -> f64 {
    0.3
}

fn default_uncertainty_threshold() -> f64 {
    0.25
}

fn default_malicious_threshold() -> f64 {
    0.5
}

fn default_fallback_score() -> f64 {
    0.2
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_scorers: default_min_scorers(),
            outlier_threshold: default_outlier_threshold(),
            uncertainty_threshold: default_uncertainty_threshold(),
            malicious_threshold: default_malicious_threshold(),
            fallback_score: default_fallback_score(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of worker threads (0 = auto-detect CPU count)
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Ingestion queue capacity (0 = unbounded, the default contract:
    /// never drop an observation; bounding trades that for bounded memory)
    #[serde(default)]
    pub queue_capacity: usize,

    /// How many finalized records the recent buffer retains
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,

    /// Grace period for in-flight tasks at shutdown (seconds)
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_worker_count() -> usize {
    4
}

fn default_recent_capacity() -> usize {
    256
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: 0,
            recent_capacity: default_recent_capacity(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl WorkerConfig {
    /// Get actual number of workers
    pub fn actual_workers(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_count
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.consensus.min_scorers, 2);
        assert_eq!(config.consensus.outlier_threshold, 0.3);
        assert_eq!(config.consensus.uncertainty_threshold, 0.25);
        assert_eq!(config.consensus.malicious_threshold, 0.5);
        assert_eq!(config.consensus.fallback_score, 0.2);
        assert_eq!(config.workers.worker_count, 4);
        assert_eq!(config.workers.queue_capacity, 0);
    }

    #[test]
    fn test_worker_count_auto() {
        let config = WorkerConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(config.actual_workers() >= 1);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [consensus]
            min_scorers = 3

            [workers]
            worker_count = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.consensus.min_scorers, 3);
        assert_eq!(config.consensus.outlier_threshold, 0.3);
        assert_eq!(config.workers.worker_count, 8);
        assert_eq!(config.workers.recent_capacity, 256);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.consensus.min_scorers, config.consensus.min_scorers);
        assert_eq!(parsed.export.buffer_size, config.export.buffer_size);
    }
}
