//! Byzantine-fault-tolerant consensus over scoring votes
//!
//! Aggregates the signed assessments for one observation into a single
//! verdict. With three scorers and at most one faulty, the median of all
//! signature-valid votes is already robust; outlier detection therefore only
//! annotates, it never excludes a vote from the median. Excluding outliers
//! and then taking the median would silently change the tolerance bound and
//! can produce self-contradictory results, so `method` records the exact
//! algorithm version on every verdict.
//!
//! The engine is stateless per call; different observations may be evaluated
//! concurrently by different workers with no shared mutable state.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ConsensusConfig;
use crate::models::clamp01;
use crate::scoring::{Assessment, ScorerId, ScoringStrategy};

/// Algorithm version recorded on every verdict so historical exports stay
/// interpretable if the aggregation changes later
pub const CONSENSUS_METHOD: &str = "median-outlier-v1";

/// Why no verdict could be produced for an observation
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// Fewer signature-valid votes than the configured quorum.
    ///
    /// A distinguished outcome, not a zero score: the worker applies the
    /// documented fallback and flags the record.
    #[error("quorum not reached: {accepted} accepted votes, {required} required")]
    QuorumNotReached {
        accepted: usize,
        required: usize,
        /// Scorers whose votes failed signature verification
        rejected: Vec<ScorerId>,
    },
}

/// The verdict for one observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Median of all accepted vote scores, in [0, 1]
    pub consensus_score: f64,
    /// Mean of accepted vote confidences, in [0, 1]
    pub confidence: f64,
    /// Accepted votes disagree beyond the uncertainty threshold
    pub high_uncertainty: bool,
    pub is_malicious: bool,
    /// Scorers whose vote deviates from the median beyond the outlier
    /// threshold. Informational metadata only; their votes still count.
    pub outlier_scorers: Vec<ScorerId>,
    /// Accepted votes, in scorer submission order
    pub votes: Vec<Assessment>,
    /// Scorers rejected for signature failure (Byzantine-vote events)
    pub rejected_scorers: Vec<ScorerId>,
    pub method: String,
    pub num_accepted: usize,
    pub num_outliers: usize,
    /// max - min among accepted scores
    pub score_spread: f64,
    pub median_score: f64,
    pub min_score: f64,
    pub max_score: f64,
}

/// Stateless aggregation engine, shared immutably across workers
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    config: ConsensusConfig,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Evaluate one observation's votes into a verdict.
    ///
    /// Votes failing signature verification against their strategy's key are
    /// dropped and counted as Byzantine rejections. If the remainder falls
    /// below `min_scorers` the result is [`ConsensusError::QuorumNotReached`].
    pub fn evaluate(
        &self,
        votes: Vec<Assessment>,
        scorers: &[Box<dyn ScoringStrategy>],
    ) -> Result<ConsensusResult, ConsensusError> {
        let mut accepted = Vec::with_capacity(votes.len());
        let mut rejected = Vec::new();

        for vote in votes {
            let valid = scorers
                .iter()
                .find(|s| s.id() == vote.scorer_id)
                .map(|s| s.verify(&vote))
                .unwrap_or(false);

            if valid {
                accepted.push(vote);
            } else {
                warn!(scorer = %vote.scorer_id, "rejecting vote with invalid signature");
                rejected.push(vote.scorer_id);
            }
        }

        if accepted.len() < self.config.min_scorers {
            return Err(ConsensusError::QuorumNotReached {
                accepted: accepted.len(),
                required: self.config.min_scorers,
                rejected,
            });
        }

        let scores: Vec<f64> = accepted.iter().map(|a| clamp01(a.score)).collect();
        let median = median(&scores);
        let min_score = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max_score = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let score_spread = max_score - min_score;

        let confidence = clamp01(
            accepted.iter().map(|a| clamp01(a.confidence)).sum::<f64>() / accepted.len() as f64,
        );

        let outlier_scorers: Vec<ScorerId> = accepted
            .iter()
            .filter(|a| (a.score - median).abs() > self.config.outlier_threshold)
            .map(|a| a.scorer_id)
            .collect();

        let high_uncertainty = score_spread > self.config.uncertainty_threshold;
        let is_malicious = median > self.config.malicious_threshold;

        debug!(
            score = median,
            spread = score_spread,
            accepted = accepted.len(),
            outliers = outlier_scorers.len(),
            high_uncertainty,
            "consensus verdict"
        );

        Ok(ConsensusResult {
            consensus_score: median,
            confidence,
            high_uncertainty,
            is_malicious,
            num_outliers: outlier_scorers.len(),
            outlier_scorers,
            num_accepted: accepted.len(),
            votes: accepted,
            rejected_scorers: rejected,
            method: CONSENSUS_METHOD.to_string(),
            score_spread,
            median_score: median,
            min_score,
            max_score,
        })
    }
}

/// Median with the documented even-count tie-break: mean of the two middle
/// values. Callers guarantee a non-empty slice.
fn median(scores: &[f64]) -> f64 {
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("scores are clamped, never NaN"));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{epoch_now, ConnectionObservation, Protocol, ThreatIntel};
    use crate::scoring::{
        default_scorers, LearnedScorer, RuleBasedScorer, StatisticalScorer,
    };
    use crate::signing::VoteSigner;

    fn obs() -> ConnectionObservation {
        ConnectionObservation::new(
            "10.0.0.1".parse().unwrap(),
            "203.0.113.9".parse().unwrap(),
            443,
            Protocol::Tcp,
        )
    }

    fn engine() -> ConsensusEngine {
        ConsensusEngine::new(ConsensusConfig::default())
    }

    /// Collect genuine signed votes from the real strategies
    fn votes_for(intel: &ThreatIntel, scorers: &[Box<dyn ScoringStrategy>]) -> Vec<Assessment> {
        scorers
            .iter()
            .map(|s| s.score(&obs(), intel).unwrap())
            .collect()
    }

    /// Secret shared between a scorer and the matching hand-built vote
    fn fixed_secret(id: ScorerId) -> [u8; 32] {
        [id.as_byte(); 32]
    }

    /// Strategy set whose signing secrets the test controls
    fn fixed_key_scorers() -> Vec<Box<dyn ScoringStrategy>> {
        vec![
            Box::new(StatisticalScorer::with_signer(VoteSigner::with_secret(
                ScorerId::Statistical,
                fixed_secret(ScorerId::Statistical),
            ))),
            Box::new(RuleBasedScorer::with_signer(VoteSigner::with_secret(
                ScorerId::RuleBased,
                fixed_secret(ScorerId::RuleBased),
            ))),
            Box::new(LearnedScorer::with_signer(VoteSigner::with_secret(
                ScorerId::Learned,
                fixed_secret(ScorerId::Learned),
            ))),
        ]
    }

    /// A validly signed vote with a chosen score
    fn vote_with_score(id: ScorerId, score: f64) -> Assessment {
        let signer = VoteSigner::with_secret(id, fixed_secret(id));
        let confidence = 0.8;
        let timestamp = epoch_now();
        Assessment {
            scorer_id: id,
            score,
            confidence,
            reasoning: format!("forced score {}", score),
            timestamp,
            signature: signer.sign(score, confidence, timestamp).to_vec(),
        }
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[0.2, 0.9, 0.25]), 0.25);
        assert!((median(&[0.2, 0.4]) - 0.3).abs() < 1e-12);
        assert_eq!(median(&[0.7]), 0.7);
    }

    #[test]
    fn test_unanimity() {
        let scorers = default_scorers();
        // Degraded default: all three emit the identical conservative vote
        let votes = votes_for(&ThreatIntel::default(), &scorers);
        let result = engine().evaluate(votes, &scorers).unwrap();

        assert_eq!(result.consensus_score, 0.2);
        assert!(result.outlier_scorers.is_empty());
        assert!(!result.high_uncertainty);
        assert_eq!(result.score_spread, 0.0);
        assert_eq!(result.num_accepted, 3);
        assert_eq!(result.method, CONSENSUS_METHOD);
    }

    #[test]
    fn test_single_deviation_tolerated() {
        // Votes {0.20, 0.25, 0.90}: median 0.25, the 0.90 scorer flagged as
        // an outlier, and the 0.70 spread sets high uncertainty - both flags
        // hold simultaneously without contradiction. Votes are validly
        // signed so the full evaluate path runs, verification included.
        let scorers = fixed_key_scorers();
        let votes = vec![
            vote_with_score(ScorerId::Statistical, 0.20),
            vote_with_score(ScorerId::RuleBased, 0.25),
            vote_with_score(ScorerId::Learned, 0.90),
        ];

        let result = engine().evaluate(votes, &scorers).unwrap();

        assert_eq!(result.num_accepted, 3);
        assert!(result.rejected_scorers.is_empty());
        assert_eq!(result.consensus_score, 0.25);
        assert_eq!(result.outlier_scorers, vec![ScorerId::Learned]);
        assert_eq!(result.num_outliers, 1);
        assert!((result.score_spread - 0.70).abs() < 1e-12);
        assert!(result.high_uncertainty);
        assert!(!result.is_malicious);
    }

    #[test]
    fn test_outliers_stay_in_median() {
        // A flagged outlier still counts toward the median. With votes
        // {0.10, 0.15, 0.60} the verdict is 0.15; excluding the outlier
        // first would shift it to 0.125.
        let scorers = fixed_key_scorers();
        let votes = vec![
            vote_with_score(ScorerId::Statistical, 0.10),
            vote_with_score(ScorerId::RuleBased, 0.15),
            vote_with_score(ScorerId::Learned, 0.60),
        ];

        let result = engine().evaluate(votes, &scorers).unwrap();

        assert_eq!(result.outlier_scorers, vec![ScorerId::Learned]);
        assert_eq!(result.num_accepted, 3);
        assert_eq!(result.consensus_score, 0.15);
        assert_eq!(result.votes.len(), 3);
    }

    #[test]
    fn test_tampered_votes_rejected_and_quorum_fails() {
        let scorers = default_scorers();
        let mut votes = votes_for(&ThreatIntel::default(), &scorers);

        // Corrupt two of three votes: quorum (2) cannot be met
        votes[0].score = 0.99;
        votes[1].confidence = 0.01;

        match engine().evaluate(votes, &scorers) {
            Err(ConsensusError::QuorumNotReached {
                accepted,
                required,
                rejected,
            }) => {
                assert_eq!(accepted, 1);
                assert_eq!(required, 2);
                assert_eq!(rejected.len(), 2);
            }
            other => panic!("expected quorum failure, got {:?}", other.map(|r| r.consensus_score)),
        }
    }

    #[test]
    fn test_one_tampered_vote_still_reaches_quorum() {
        let scorers = default_scorers();
        let mut votes = votes_for(&ThreatIntel::default(), &scorers);
        let bad_scorer = votes[2].scorer_id;
        votes[2].score = 1.0;

        let result = engine().evaluate(votes, &scorers).unwrap();
        assert_eq!(result.num_accepted, 2);
        assert_eq!(result.rejected_scorers, vec![bad_scorer]);
        // Even count: median is the mean of the two remaining 0.2 votes
        assert_eq!(result.consensus_score, 0.2);
    }

    #[test]
    fn test_result_values_stay_clamped() {
        let scorers = default_scorers();
        let intel = ThreatIntel {
            vt_flagged_vendors: 84,
            vt_total_vendors: 84,
            abuse_confidence_pct: 100,
            abuse_report_count: 9000,
            country_code: "KP".to_string(),
            ..Default::default()
        };
        let result = engine().evaluate(votes_for(&intel, &scorers), &scorers).unwrap();
        assert!((0.0..=1.0).contains(&result.consensus_score));
        assert!((0.0..=1.0).contains(&result.confidence));
        assert!(result.is_malicious);
    }

    #[test]
    fn test_unknown_scorer_vote_rejected() {
        // A vote claiming an id whose strategy is absent from the set can
        // never verify.
        let scorers = default_scorers();
        let mut votes = votes_for(&ThreatIntel::default(), &scorers);
        let only_two: Vec<Box<dyn ScoringStrategy>> = default_scorers()
            .into_iter()
            .filter(|s| s.id() != ScorerId::Learned)
            .collect();

        // Votes were signed by the first set; verifying against a second set
        // with fresh keys rejects everything from it.
        votes.retain(|v| v.scorer_id != ScorerId::Learned);
        let outcome = engine().evaluate(votes, &only_two);
        assert!(outcome.is_err());
    }
}
