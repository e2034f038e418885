// =============================================================================
// Signature Verification — HMAC-SHA256 signal authentication
// =============================================================================
//
// Verification is an injected capability: the ledger calls whatever verifier
// it was constructed with. Deployments that do not distribute node secrets
// run the no-op verifier and rely on transport-level auth instead.
//
// SECURITY: node secrets are never logged or serialized.
// =============================================================================

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;
use tracing::debug;

use crate::ledger::TradeSignal;

type HmacSha256 = Hmac<Sha256>;

/// Pluggable signal-signature verification.
///
/// A failed verification is a rejection of the signal, never a retryable
/// condition — the engine does not distinguish "bad signature" from "unknown
/// node" to the submitter.
pub trait SignatureVerifier: Send + Sync {
    /// Returns `true` if `signal.signature` is valid for the claimed node.
    /// Called only when a signature is present.
    fn verify(&self, signal: &TradeSignal) -> bool;
}

// =============================================================================
// No-op verifier
// =============================================================================

/// Accepts every signature. Default for deployments without key distribution.
pub struct NoopVerifier;

impl SignatureVerifier for NoopVerifier {
    fn verify(&self, _signal: &TradeSignal) -> bool {
        true
    }
}

// =============================================================================
// HMAC-SHA256 verifier
// =============================================================================

/// Verifies hex-encoded HMAC-SHA256 signatures against per-node shared
/// secrets registered out of band.
pub struct HmacSha256Verifier {
    secrets: RwLock<HashMap<String, String>>,
}

impl HmacSha256Verifier {
    pub fn new() -> Self {
        Self {
            secrets: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or rotate) the shared secret for a node.
    pub fn set_secret(&self, node_id: impl Into<String>, secret: impl Into<String>) {
        let node_id = node_id.into();
        debug!(node_id = %node_id, "node secret registered");
        self.secrets.write().insert(node_id, secret.into());
    }

    /// Produce the hex HMAC-SHA256 signature of `payload` under `secret`.
    /// Exposed so test nodes and provisioning tooling can sign signals.
    pub fn sign(secret: &str, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl Default for HmacSha256Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier for HmacSha256Verifier {
    fn verify(&self, signal: &TradeSignal) -> bool {
        let signature = match &signal.signature {
            Some(sig) => sig,
            None => return false,
        };

        let secrets = self.secrets.read();
        let secret = match secrets.get(&signal.node_id) {
            Some(s) => s,
            None => {
                debug!(node_id = %signal.node_id, "no secret registered for node");
                return false;
            }
        };

        let expected = Self::sign(secret, &signal.canonical_payload());

        // Constant-time comparison; a signature mismatch must not leak where
        // the first differing byte sits.
        let a = expected.as_bytes();
        let b = signature.as_bytes();
        if a.len() != b.len() {
            return false;
        }
        let mut diff: u8 = 0;
        for (x, y) in a.iter().zip(b.iter()) {
            diff |= x ^ y;
        }
        diff == 0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalAction;
    use chrono::Utc;

    fn test_signal(node_id: &str, signature: Option<String>) -> TradeSignal {
        TradeSignal {
            id: "sig-1".to_string(),
            node_id: node_id.to_string(),
            symbol: "BTC/USD".to_string(),
            timeframe: "15m".to_string(),
            action: SignalAction::Buy,
            confidence: 0.9,
            price: 50_000.0,
            quantity: 0.1,
            timestamp: Utc::now(),
            signature,
        }
    }

    #[test]
    fn noop_accepts_anything() {
        let v = NoopVerifier;
        assert!(v.verify(&test_signal("node-a", Some("garbage".into()))));
    }

    #[test]
    fn hmac_roundtrip_verifies() {
        let v = HmacSha256Verifier::new();
        v.set_secret("node-a", "s3cret");

        let mut signal = test_signal("node-a", None);
        let sig = HmacSha256Verifier::sign("s3cret", &signal.canonical_payload());
        signal.signature = Some(sig);

        assert!(v.verify(&signal));
    }

    #[test]
    fn hmac_rejects_wrong_secret() {
        let v = HmacSha256Verifier::new();
        v.set_secret("node-a", "s3cret");

        let mut signal = test_signal("node-a", None);
        let sig = HmacSha256Verifier::sign("wrong", &signal.canonical_payload());
        signal.signature = Some(sig);

        assert!(!v.verify(&signal));
    }

    #[test]
    fn hmac_rejects_unknown_node() {
        let v = HmacSha256Verifier::new();
        let mut signal = test_signal("node-unknown", None);
        let sig = HmacSha256Verifier::sign("s3cret", &signal.canonical_payload());
        signal.signature = Some(sig);

        assert!(!v.verify(&signal));
    }

    #[test]
    fn hmac_rejects_tampered_payload() {
        let v = HmacSha256Verifier::new();
        v.set_secret("node-a", "s3cret");

        let mut signal = test_signal("node-a", None);
        let sig = HmacSha256Verifier::sign("s3cret", &signal.canonical_payload());
        signal.signature = Some(sig);
        signal.confidence = 0.1; // tamper after signing

        assert!(!v.verify(&signal));
    }

    #[test]
    fn hmac_rejects_missing_signature() {
        let v = HmacSha256Verifier::new();
        v.set_secret("node-a", "s3cret");
        assert!(!v.verify(&test_signal("node-a", None)));
    }
}
