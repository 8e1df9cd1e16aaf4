//! Learned scoring strategy
//!
//! A fixed-weight linear model over a small feature vector, squashed through
//! a logistic into [0, 1]. The weights have not been fit to labeled traffic
//! yet, so this scorer deliberately reports a lower confidence than its
//! peers; the consensus layer is meant to treat it with skepticism until a
//! trained replacement lands. That asymmetry is intentional, not a defect.

use crate::models::{ConnectionObservation, ThreatIntel};

use super::{Assessment, RawVote, ScorerCore, ScorerId, ScoringStrategy};

/// Feature order: abuse confidence, VT ratio, port entropy proxy, whitelist
const WEIGHTS: [f64; 4] = [1.8, 2.2, 0.5, -2.5];
const BIAS: f64 = -2.0;

/// Confidence ceiling for the untrained model
const LEARNED_CONFIDENCE: f64 = 0.55;

/// Ports whose entropy proxy is pinned low (expected, well-known services)
const EXPECTED_PORTS: [u16; 4] = [80, 443, 22, 53];

pub struct LearnedScorer {
    core: ScorerCore,
}

impl LearnedScorer {
    pub fn new() -> Self {
        Self {
            core: ScorerCore::new(ScorerId::Learned),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_signer(signer: crate::signing::VoteSigner) -> Self {
        Self {
            core: ScorerCore::with_signer(signer),
        }
    }

    fn features(obs: &ConnectionObservation, intel: &ThreatIntel) -> [f64; 4] {
        [
            f64::from(intel.abuse_confidence_pct) / 100.0,
            intel.vt_ratio(),
            port_entropy_proxy(obs.dst_port),
            if intel.is_whitelisted { 1.0 } else { 0.0 },
        ]
    }

    fn evaluate(&self, obs: &ConnectionObservation, intel: &ThreatIntel) -> RawVote {
        let features = Self::features(obs, intel);

        let z: f64 = features
            .iter()
            .zip(WEIGHTS.iter())
            .map(|(f, w)| f * w)
            .sum::<f64>()
            + BIAS;
        let score = sigmoid(z);

        let reasoning = format!(
            "linear model z={:.3} features=[abuse={:.2} vt={:.2} port={:.2} wl={:.0}]",
            z, features[0], features[1], features[2], features[3],
        );

        RawVote {
            score,
            confidence: LEARNED_CONFIDENCE,
            reasoning,
        }
    }
}

impl Default for LearnedScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoringStrategy for LearnedScorer {
    fn id(&self) -> ScorerId {
        self.core.id()
    }

    fn score(&self, obs: &ConnectionObservation, intel: &ThreatIntel) -> anyhow::Result<Assessment> {
        if intel.is_empty() {
            return Ok(self.core.degraded());
        }
        Ok(self.core.finalize(self.evaluate(obs, intel)))
    }

    fn verify(&self, assessment: &Assessment) -> bool {
        self.core.verify(assessment)
    }

    fn average_confidence(&self) -> f64 {
        self.core.average_confidence()
    }
}

/// Crude stand-in for destination-port rarity until a real distribution is
/// learned: expected service ports score low, higher ports trend upward.
fn port_entropy_proxy(port: u16) -> f64 {
    if EXPECTED_PORTS.contains(&port) {
        0.1
    } else {
        (f64::from(port) / f64::from(u16::MAX)).sqrt()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
