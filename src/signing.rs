//! Vote signing and verification
//!
//! Each scoring strategy holds its own HMAC-SHA256 secret, generated at
//! construction and never exported. The signature covers the scorer id and
//! the numeric vote fields, so any mutation of a signed assessment between
//! creation and consensus evaluation fails verification.
//!
//! ## Limitation
//!
//! The key is symmetric and lives in the same process that verifies. This
//! detects accidental or in-process corruption of a vote (for example a
//! concurrency bug overwriting a field). It is NOT a defense against an
//! external adversary who can read process memory; cross-trust-boundary
//! integrity would need asymmetric signing with a separately held key.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::scoring::{Assessment, ScorerId};

type HmacSha256 = Hmac<Sha256>;

/// Length of a vote signature in bytes
pub const SIGNATURE_LEN: usize = 32;

/// Per-strategy signer holding a process-local symmetric secret
pub struct VoteSigner {
    secret: [u8; 32],
    scorer_id: ScorerId,
}

impl VoteSigner {
    /// Create a signer with a freshly generated random secret
    pub fn new(scorer_id: ScorerId) -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self { secret, scorer_id }
    }

    /// Create a signer with a fixed secret (tests only)
    #[cfg(test)]
    pub fn with_secret(scorer_id: ScorerId, secret: [u8; 32]) -> Self {
        Self { secret, scorer_id }
    }

    pub fn scorer_id(&self) -> ScorerId {
        self.scorer_id
    }

    /// Compute the HMAC-SHA256 signature over the canonical vote fields
    pub fn sign(&self, score: f64, confidence: f64, timestamp: f64) -> [u8; SIGNATURE_LEN] {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC key size is always valid");

        mac.update(&[self.scorer_id.as_byte()]);
        mac.update(&score.to_le_bytes());
        mac.update(&confidence.to_le_bytes());
        mac.update(&timestamp.to_le_bytes());

        let result = mac.finalize();
        let bytes = result.into_bytes();
        let mut sig = [0u8; SIGNATURE_LEN];
        sig.copy_from_slice(&bytes);
        sig
    }

    /// Verify an assessment against this signer's secret.
    ///
    /// Returns false on scorer-id mismatch, wrong-length signature, or any
    /// mutated field. Constant-time comparison via the `Mac` verifier.
    pub fn verify(&self, assessment: &Assessment) -> bool {
        if assessment.scorer_id != self.scorer_id {
            return false;
        }
        if assessment.signature.len() != SIGNATURE_LEN {
            return false;
        }

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC key size is always valid");

        mac.update(&[assessment.scorer_id.as_byte()]);
        mac.update(&assessment.score.to_le_bytes());
        mac.update(&assessment.confidence.to_le_bytes());
        mac.update(&assessment.timestamp.to_le_bytes());

        mac.verify_slice(&assessment.signature).is_ok()
    }
}

impl std::fmt::Debug for VoteSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret
        f.debug_struct("VoteSigner")
            .field("scorer_id", &self.scorer_id)
            .finish_non_exhaustive()
    }
}
