//! Scoring strategies
//!
//! Three independent strategies score each enriched observation and emit a
//! signed [`Assessment`]. The set is deliberately closed (a tagged enum, not
//! a plugin registry): the consensus algorithm's fault tolerance bound is
//! derived from n=3 scorers with at most f=1 faulty, and an open-ended set
//! would invalidate it.
//!
//! Strategies are pure over (observation, intel) except for the vote
//! timestamp; none performs I/O. Enrichment is pre-fetched by the worker, so
//! a strategy receiving zero-value intel degrades to a conservative default
//! assessment instead of failing.

pub mod learned;
pub mod rules;
pub mod statistical;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::models::{clamp01, epoch_now, ConnectionObservation, ThreatIntel};
use crate::signing::VoteSigner;

pub use learned::LearnedScorer;
pub use rules::RuleBasedScorer;
pub use statistical::StatisticalScorer;

/// Conservative score emitted when enrichment data is entirely missing
pub const DEGRADED_SCORE: f64 = 0.2;

/// Confidence attached to a degraded default assessment
pub const DEGRADED_CONFIDENCE: f64 = 0.3;

/// Identity of a scoring strategy (fixed, closed set)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ScorerId {
    Statistical,
    RuleBased,
    Learned,
}

impl ScorerId {
    /// All scorers in canonical order
    pub fn all() -> [ScorerId; 3] {
        [ScorerId::Statistical, ScorerId::RuleBased, ScorerId::Learned]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScorerId::Statistical => "statistical",
            ScorerId::RuleBased => "rule_based",
            ScorerId::Learned => "learned",
        }
    }

    /// Canonical byte for signature input
    pub fn as_byte(&self) -> u8 {
        match self {
            ScorerId::Statistical => 1,
            ScorerId::RuleBased => 2,
            ScorerId::Learned => 3,
        }
    }
}

impl std::fmt::Display for ScorerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One strategy's signed vote for one observation.
///
/// Immutable after creation; consumed exactly once by the consensus engine
/// and then persisted only inside the export record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub scorer_id: ScorerId,
    /// Threat score, always within [0, 1]
    pub score: f64,
    /// Scorer's confidence in its own vote, always within [0, 1]
    pub confidence: f64,
    /// Human-readable explanation; informational, never authoritative
    pub reasoning: String,
    /// Vote creation time, epoch seconds
    pub timestamp: f64,
    /// HMAC-SHA256 over (scorer_id, score, confidence, timestamp)
    #[serde(skip_serializing, default)]
    pub signature: Vec<u8>,
}

/// A raw score produced by a strategy before signing
struct RawVote {
    score: f64,
    confidence: f64,
    reasoning: String,
}

/// Common interface all three strategies implement
pub trait ScoringStrategy: Send + Sync {
    fn id(&self) -> ScorerId;

    /// Produce a signed assessment for one enriched observation.
    ///
    /// Never blocks, never errors on missing intel (degraded default
    /// instead); errors are reserved for internal invariant violations.
    fn score(&self, obs: &ConnectionObservation, intel: &ThreatIntel) -> anyhow::Result<Assessment>;

    /// Verify a vote against this strategy's process-local secret
    fn verify(&self, assessment: &Assessment) -> bool;

    /// Running average of emitted confidences (accuracy-tracking counter)
    fn average_confidence(&self) -> f64;
}

/// Shared per-strategy state: the signing key plus the running confidence
/// average every variant maintains (explicit owned state, never global).
pub(crate) struct ScorerCore {
    signer: VoteSigner,
    confidence_avg: Mutex<RunningAverage>,
}

#[derive(Default)]
struct RunningAverage {
    sum: f64,
    count: u64,
}

impl ScorerCore {
    pub(crate) fn new(id: ScorerId) -> Self {
        Self {
            signer: VoteSigner::new(id),
            confidence_avg: Mutex::new(RunningAverage::default()),
        }
    }

    /// Build around a caller-supplied signer so tests can hold the secret
    /// and construct votes with chosen scores.
    #[cfg(test)]
    pub(crate) fn with_signer(signer: VoteSigner) -> Self {
        Self {
            signer,
            confidence_avg: Mutex::new(RunningAverage::default()),
        }
    }

    pub(crate) fn id(&self) -> ScorerId {
        self.signer.scorer_id()
    }

    pub(crate) fn verify(&self, assessment: &Assessment) -> bool {
        self.signer.verify(assessment)
    }

    pub(crate) fn average_confidence(&self) -> f64 {
        let avg = self.confidence_avg.lock();
        if avg.count == 0 {
            0.0
        } else {
            avg.sum / avg.count as f64
        }
    }

    /// Clamp, stamp, sign, and record a raw vote
    fn finalize(&self, raw: RawVote) -> Assessment {
        let score = clamp01(raw.score);
        let confidence = clamp01(raw.confidence);
        let timestamp = epoch_now();
        let signature = self.signer.sign(score, confidence, timestamp).to_vec();

        {
            let mut avg = self.confidence_avg.lock();
            avg.sum += confidence;
            avg.count += 1;
        }

        Assessment {
            scorer_id: self.id(),
            score,
            confidence,
            reasoning: raw.reasoning,
            timestamp,
            signature,
        }
    }

    /// Conservative default assessment for zero-value intel
    fn degraded(&self) -> Assessment {
        self.finalize(RawVote {
            score: DEGRADED_SCORE,
            confidence: DEGRADED_CONFIDENCE,
            reasoning: "no enrichment data available; conservative default".to_string(),
        })
    }
}

/// Build the default closed set of three strategies
pub fn default_scorers() -> Vec<Box<dyn ScoringStrategy>> {
    vec![
        Box::new(StatisticalScorer::new()),
        Box::new(RuleBasedScorer::new()),
        Box::new(LearnedScorer::new()),
    ]
}
