use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use uuid::Uuid;

/// Transport protocol of an observed connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            other => Err(format!("Unknown protocol: {}", other)),
        }
    }
}

/// One observed network flow, as pushed by the capture collaborator.
///
/// Immutable once enqueued; consumed by exactly one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionObservation {
    /// Observation time, epoch seconds
    pub timestamp: f64,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub protocol: Protocol,
    /// Opaque capture metadata (interface, flow id, ...)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ConnectionObservation {
    pub fn new(src_ip: IpAddr, dst_ip: IpAddr, dst_port: u16, protocol: Protocol) -> Self {
        Self {
            timestamp: epoch_now(),
            src_ip,
            dst_ip,
            dst_port,
            protocol,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Enrichment bundle for a destination IP.
///
/// All fields are optional in practice: collaborators may return partial
/// data, and the zero value (`Default`) is the documented substitute when a
/// lookup fails entirely. Consumers must not assume any field is populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreatIntel {
    /// Vendors that flagged the IP on VirusTotal
    #[serde(default)]
    pub vt_flagged_vendors: u32,
    /// Total vendors that scanned the IP on VirusTotal
    #[serde(default)]
    pub vt_total_vendors: u32,
    /// AbuseIPDB confidence of abuse, 0-100
    #[serde(default)]
    pub abuse_confidence_pct: u8,
    /// AbuseIPDB report count
    #[serde(default)]
    pub abuse_report_count: u32,
    /// ISO country code, may be empty
    #[serde(default)]
    pub country_code: String,
    /// Destination is on the local whitelist
    #[serde(default)]
    pub is_whitelisted: bool,
}

impl ThreatIntel {
    /// Fraction of VirusTotal vendors that flagged the IP (0 when unscanned)
    pub fn vt_ratio(&self) -> f64 {
        if self.vt_total_vendors == 0 {
            0.0
        } else {
            f64::from(self.vt_flagged_vendors) / f64::from(self.vt_total_vendors)
        }
    }

    /// True when every enrichment field is at its zero value. A whitelist
    /// hit counts as intel: it must reach the scorers, not the degraded path.
    pub fn is_empty(&self) -> bool {
        self.vt_total_vendors == 0
            && self.abuse_confidence_pct == 0
            && self.abuse_report_count == 0
            && self.country_code.is_empty()
            && !self.is_whitelisted
    }
}

/// A finalized verdict record: observation + intel + consensus outcome.
///
/// Created once by a worker after scoring, then fanned out read-only to the
/// recent buffer, the storage collaborator, and the exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedRecord {
    pub id: Uuid,
    pub observation: ConnectionObservation,
    pub intel: ThreatIntel,
    /// Consensus verdict; `None` when quorum failed and the fallback applied
    pub consensus: Option<crate::consensus::ConsensusResult>,
    /// Score that downstream consumers act on (consensus median or fallback)
    pub final_score: f64,
    pub is_malicious: bool,
    pub used_fallback: bool,
    pub finalized_at: DateTime<Utc>,
}

impl FinalizedRecord {
    pub fn from_consensus(
        observation: ConnectionObservation,
        intel: ThreatIntel,
        consensus: crate::consensus::ConsensusResult,
    ) -> Self {
        let final_score = consensus.consensus_score;
        let is_malicious = consensus.is_malicious;
        Self {
            id: Uuid::new_v4(),
            observation,
            intel,
            consensus: Some(consensus),
            final_score,
            is_malicious,
            used_fallback: false,
            finalized_at: Utc::now(),
        }
    }

    pub fn fallback(
        observation: ConnectionObservation,
        intel: ThreatIntel,
        fallback_score: f64,
        malicious_threshold: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            observation,
            intel,
            consensus: None,
            final_score: fallback_score,
            is_malicious: fallback_score > malicious_threshold,
            used_fallback: true,
            finalized_at: Utc::now(),
        }
    }
}

/// Current time as float epoch seconds
pub fn epoch_now() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

/// Clamp a score or confidence to the [0, 1] contract
pub fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}
