//! Rule-based scoring strategy
//!
//! An ordered set of named additive rules. Each triggered rule contributes a
//! fixed score delta and a tag; the whitelist deduction applies after all
//! additive rules, and the total is clamped to [0, 1] at the end. Rules are
//! deterministic, so this scorer reports a fixed high confidence.

use crate::models::{ConnectionObservation, ThreatIntel};

use super::{Assessment, RawVote, ScorerCore, ScorerId, ScoringStrategy};

/// Ports routinely targeted for lateral movement / initial access
const HIGH_RISK_PORTS: [u16; 7] = [3389, 445, 1433, 135, 139, 5900, 4444];

/// Legacy cleartext service ports
const MEDIUM_RISK_PORTS: [u16; 5] = [21, 23, 25, 110, 143];

/// Country codes with elevated base risk in this deployment's threat model
const HIGH_RISK_COUNTRIES: [&str; 4] = ["KP", "IR", "SY", "SD"];

/// Confidence reported for every rule-based vote (rules are deterministic)
const RULE_CONFIDENCE: f64 = 0.85;

/// One additive rule: predicate, delta, tag
struct Rule {
    tag: &'static str,
    delta: f64,
    matches: fn(&ConnectionObservation, &ThreatIntel) -> bool,
}

/// Ordered rule table; evaluation order is part of the contract
const RULES: [Rule; 5] = [
    Rule {
        tag: "HIGH_RISK_PORT",
        delta: 0.3,
        matches: |obs, _| HIGH_RISK_PORTS.contains(&obs.dst_port),
    },
    Rule {
        tag: "MEDIUM_RISK_PORT",
        delta: 0.15,
        matches: |obs, _| MEDIUM_RISK_PORTS.contains(&obs.dst_port),
    },
    Rule {
        tag: "VT_HIGH_THREAT",
        delta: 0.4,
        matches: |_, intel| intel.vt_flagged_vendors >= 5,
    },
    Rule {
        tag: "ABUSEIPDB_HIGH",
        delta: 0.35,
        matches: |_, intel| intel.abuse_confidence_pct >= 75,
    },
    Rule {
        tag: "HIGH_RISK_COUNTRY",
        delta: 0.2,
        matches: |_, intel| HIGH_RISK_COUNTRIES.contains(&intel.country_code.as_str()),
    },
];

/// Flat deduction for whitelisted destinations, applied after additive rules
const WHITELIST_DEDUCTION: f64 = 0.5;

pub struct RuleBasedScorer {
    core: ScorerCore,
}

impl RuleBasedScorer {
    pub fn new() -> Self {
        Self {
            core: ScorerCore::new(ScorerId::RuleBased),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_signer(signer: crate::signing::VoteSigner) -> Self {
        Self {
            core: ScorerCore::with_signer(signer),
        }
    }

    fn evaluate(&self, obs: &ConnectionObservation, intel: &ThreatIntel) -> RawVote {
        let mut score = 0.0;
        let mut tags: Vec<&'static str> = Vec::new();

        for rule in &RULES {
            if (rule.matches)(obs, intel) {
                score += rule.delta;
                tags.push(rule.tag);
            }
        }

        if intel.is_whitelisted {
            score -= WHITELIST_DEDUCTION;
            tags.push("WHITELISTED");
        }

        let reasoning = if tags.is_empty() {
            "no rules triggered".to_string()
        } else {
            tags.join(",")
        };

        RawVote {
            score,
            confidence: RULE_CONFIDENCE,
            reasoning,
        }
    }
}

impl Default for RuleBasedScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoringStrategy for RuleBasedScorer {
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

    fn scanned() -> ThreatIntel {
        ThreatIntel {
            vt_total_vendors: 84,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_rules_triggered() {
        let scorer = RuleBasedScorer::new();
        let a = scorer.score(&obs(443), &scanned()).unwrap();
        assert_eq!(a.score, 0.0);
        assert_eq!(a.reasoning, "no rules triggered");
        assert_eq!(a.confidence, RULE_CONFIDENCE);
    }

    #[test]
    fn test_high_risk_port_rule() {
        let scorer = RuleBasedScorer::new();
        let a = scorer.score(&obs(3389), &scanned()).unwrap();
        assert!((a.score - 0.3).abs() < 1e-9);
        assert!(a.reasoning.contains("HIGH_RISK_PORT"));
    }

    #[test]
    fn test_stacked_rules_cap_at_one() {
        let scorer = RuleBasedScorer::new();
        let intel = ThreatIntel {
            vt_flagged_vendors: 15,
            vt_total_vendors: 84,
            abuse_confidence_pct: 95,
            country_code: "KP".to_string(),
            ..Default::default()
        };
        // 0.3 + 0.4 + 0.35 + 0.2 = 1.25, clamped
        let a = scorer.score(&obs(3389), &intel).unwrap();
        assert_eq!(a.score, 1.0);
        for tag in ["HIGH_RISK_PORT", "VT_HIGH_THREAT", "ABUSEIPDB_HIGH", "HIGH_RISK_COUNTRY"] {
            assert!(a.reasoning.contains(tag), "missing tag {}", tag);
        }
    }

    #[test]
    fn test_rdp_with_vt_and_abuse_scores_high() {
        let scorer = RuleBasedScorer::new();
        let intel = ThreatIntel {
            vt_flagged_vendors: 15,
            vt_total_vendors: 84,
            abuse_confidence_pct: 95,
            ..Default::default()
        };
        let a = scorer.score(&obs(3389), &intel).unwrap();
        assert!(a.score >= 0.8, "score was {}", a.score);
    }

    #[test]
    fn test_whitelist_deducts_after_additive_rules() {
        let scorer = RuleBasedScorer::new();
        let intel = ThreatIntel {
            vt_flagged_vendors: 6,
            vt_total_vendors: 84,
            is_whitelisted: true,
            ..Default::default()
        };
        // 0.4 (VT) - 0.5 (whitelist), clamped to 0
        let a = scorer.score(&obs(8443), &intel).unwrap();
        assert_eq!(a.score, 0.0);
        assert!(a.reasoning.contains("WHITELISTED"));
    }

    #[test]
    fn test_whitelist_only_intel_skips_degraded_path() {
        // A whitelist hit with no other enrichment is real intel. The vote
        // must come from the rule table (deduction applied, WHITELISTED tag),
        // not the degraded default.
        let scorer = RuleBasedScorer::new();
        let intel = ThreatIntel {
            is_whitelisted: true,
            ..Default::default()
        };
        let a = scorer.score(&obs(443), &intel).unwrap();
        assert_eq!(a.score, 0.0);
        assert!(a.reasoning.contains("WHITELISTED"));
        assert_eq!(a.confidence, RULE_CONFIDENCE);
    }

    #[test]
    fn test_medium_risk_port() {
        let scorer = RuleBasedScorer::new();
        let a = scorer.score(&obs(23), &scanned()).unwrap();
        assert!((a.score - 0.15).abs() < 1e-9);
        assert!(a.reasoning.contains("MEDIUM_RISK_PORT"));
    }
}
