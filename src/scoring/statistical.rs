//! Statistical scoring strategy
//!
//! Treats the VirusTotal vendor counts as a Bernoulli sample and scores from
//! the Wilson lower confidence bound, blended with the AbuseIPDB confidence
//! and a port-commonality prior. The emitted confidence widens (drops) as
//! intel fields go missing, so the consensus layer weighs sparse evidence
//! appropriately.

use tracing::trace;

use crate::models::{ConnectionObservation, ThreatIntel};

use super::{Assessment, RawVote, ScorerCore, ScorerId, ScoringStrategy};

/// Ports common enough that traffic to them carries no signal by itself
const COMMON_PORTS: [u16; 4] = [80, 443, 22, 53];

/// z for a 95% interval
const WILSON_Z: f64 = 1.96;

pub struct StatisticalScorer {
    core: ScorerCore,
}

impl StatisticalScorer {
    pub fn new() -> Self {
        Self {
            core: ScorerCore::new(ScorerId::Statistical),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_signer(signer: crate::signing::VoteSigner) -> Self {
        Self {
            core: ScorerCore::with_signer(signer),
        }
    }

    fn evaluate(&self, obs: &ConnectionObservation, intel: &ThreatIntel) -> RawVote {
        let p_abuse = f64::from(intel.abuse_confidence_pct) / 100.0;

        // Wilson lower bound on the vendor-flag proportion; 0 when unscanned
        let p_vt = wilson_lower_bound(
            u64::from(intel.vt_flagged_vendors),
            u64::from(intel.vt_total_vendors),
        );

        let port_prior = port_prior(obs.dst_port);

        let mut score = 0.45 * p_abuse + 0.45 * p_vt + port_prior;
        if intel.is_whitelisted {
            score -= 0.5;
        }

        // Confidence narrows with evidence, widens as sources go missing
        let mut confidence = 0.9;
        if intel.vt_total_vendors == 0 {
            confidence -= 0.2;
        }
        if intel.abuse_confidence_pct == 0 && intel.abuse_report_count == 0 {
            confidence -= 0.2;
        }

        let reasoning = format!(
            "abuse_p={:.2} vt_wilson={:.2} ({}/{} vendors) port_prior={:+.2}{}",
            p_abuse,
            p_vt,
            intel.vt_flagged_vendors,
            intel.vt_total_vendors,
            port_prior,
            if intel.is_whitelisted { " whitelisted" } else { "" },
        );

        trace!(port = obs.dst_port, score, confidence, "statistical vote");

        RawVote {
            score,
            confidence,
            reasoning,
        }
    }
}

impl Default for StatisticalScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoringStrategy for StatisticalScorer {
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

/// Prior adjustment from destination-port commonality: well-known service
/// ports lower the score, uncommon high ports raise it slightly.
fn port_prior(port: u16) -> f64 {
    if COMMON_PORTS.contains(&port) {
        -0.1
    } else if port >= 1024 {
        0.1
    } else {
        0.0
    }
}

/// Wilson score interval lower bound for k successes in n trials
fn wilson_lower_bound(k: u64, n: u64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    let p = k as f64 / n;
    let z2 = WILSON_Z * WILSON_Z;

    let center = p + z2 / (2.0 * n);
    let margin = WILSON_Z * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt();
    ((center - margin) / (1.0 + z2 / n)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Protocol;

    fn obs(port: u16) -> ConnectionObservation {
        ConnectionObservation::new(
            "10.0.0.1".parse().unwrap(),
            "198.51.100.1".parse().unwrap(),
            port,
            Protocol::Tcp,
        )
    }

    #[test]
    fn test_wilson_bounds() {
        assert_eq!(wilson_lower_bound(0, 0), 0.0);
        assert_eq!(wilson_lower_bound(0, 84), 0.0);
        // Unanimous flags still stay below 1.0 (finite sample)
        let full = wilson_lower_bound(84, 84);
        assert!(full > 0.9 && full < 1.0);
        // Monotone in k
        assert!(wilson_lower_bound(10, 84) > wilson_lower_bound(5, 84));
    }

    #[test]
    fn test_benign_destination_scores_low() {
        let scorer = StatisticalScorer::new();
        let intel = ThreatIntel {
            vt_flagged_vendors: 0,
            vt_total_vendors: 84,
            abuse_confidence_pct: 0,
            ..Default::default()
        };
        let a = scorer.score(&obs(443), &intel).unwrap();
        assert!(a.score < 0.2, "benign score was {}", a.score);
    }

    #[test]
    fn test_flagged_destination_scores_high() {
        let scorer = StatisticalScorer::new();
        let intel = ThreatIntel {
            vt_flagged_vendors: 15,
            vt_total_vendors: 84,
            abuse_confidence_pct: 95,
            abuse_report_count: 120,
            ..Default::default()
        };
        let a = scorer.score(&obs(3389), &intel).unwrap();
        assert!(a.score > 0.5, "flagged score was {}", a.score);
        assert!(a.confidence > 0.8);
    }

    #[test]
    fn test_confidence_widens_on_missing_sources() {
        let scorer = StatisticalScorer::new();
        let only_abuse = ThreatIntel {
            abuse_confidence_pct: 40,
            abuse_report_count: 12,
            ..Default::default()
        };
        let a = scorer.score(&obs(8080), &only_abuse).unwrap();
        assert!(a.confidence < 0.8);
    }

    #[test]
    fn test_whitelist_pulls_score_down() {
        let scorer = StatisticalScorer::new();
        let intel = ThreatIntel {
            vt_flagged_vendors: 10,
            vt_total_vendors: 84,
            abuse_confidence_pct: 50,
            is_whitelisted: true,
            ..Default::default()
        };
        let listed = scorer.score(&obs(443), &intel).unwrap();
        let unlisted = scorer
            .score(
                &obs(443),
                &ThreatIntel {
                    is_whitelisted: false,
                    ..intel
                },
            )
            .unwrap();
        assert!(listed.score < unlisted.score);
    }
}
