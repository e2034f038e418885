// =============================================================================
// Signal Ledger — live signals bucketed by (symbol, timeframe)
// =============================================================================
//
// Owns every unexpired, unconsumed signal. Buckets are created on demand and
// each bucket has its own mutex; the bucket map itself sits behind a RwLock
// so unrelated keys never contend. The evaluator consumes a bucket while
// holding its mutex, which is what keeps evaluate-and-consume atomic per key
// with respect to the periodic sweep.
//
// Expiry is enforced twice: at submission time (low-latency path) and by
// `sweep` (safety-net path). A signal that slips past submission validation
// can therefore still never be counted once it ages out.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{BucketKey, SignalAction};
use crate::verify::SignatureVerifier;

// =============================================================================
// Signal
// =============================================================================

/// One node's timestamped opinion about an asset and time horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    /// Unique per submission. Caller-supplied; generate with UUID v4 if the
    /// submitting node has no id scheme of its own.
    pub id: String,
    pub node_id: String,
    pub symbol: String,
    pub timeframe: String,
    pub action: SignalAction,
    /// Self-reported conviction in [0, 1].
    pub confidence: f64,
    pub price: f64,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
    /// Hex HMAC-SHA256 over `canonical_payload()`, if the deployment signs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl TradeSignal {
    pub fn key(&self) -> BucketKey {
        BucketKey::new(self.symbol.clone(), self.timeframe.clone())
    }

    /// The byte string a node signs. Field order is part of the wire
    /// contract; changing it invalidates every provisioned secret.
    pub fn canonical_payload(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.id,
            self.node_id,
            self.symbol,
            self.timeframe,
            self.action,
            self.confidence,
            self.price,
            self.timestamp.timestamp_millis()
        )
    }

    pub fn is_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.timestamp > window
    }
}

// =============================================================================
// Submission outcome
// =============================================================================

/// Why a signal was not recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitRejection {
    InvalidSignature,
    Expired,
}

impl std::fmt::Display for SubmitRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSignature => write!(f, "invalid_signature"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Result of a submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Recorded; `pending` is the bucket's size after the append, so the
    /// caller can opportunistically trigger evaluation.
    Accepted { pending: usize },
    /// Same id already present for this key. Silently ignored, not an error.
    Duplicate,
    Rejected(SubmitRejection),
}

// =============================================================================
// Ledger
// =============================================================================

/// The set of currently live signals, grouped by (symbol, timeframe).
pub struct SignalLedger {
    buckets: RwLock<HashMap<BucketKey, Arc<Mutex<Vec<TradeSignal>>>>>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl SignalLedger {
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            verifier,
        }
    }

    /// Get (or create) the bucket for `key`.
    fn bucket(&self, key: &BucketKey) -> Arc<Mutex<Vec<TradeSignal>>> {
        if let Some(b) = self.buckets.read().get(key) {
            return b.clone();
        }
        let mut buckets = self.buckets.write();
        buckets
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Validate and record a signal.
    ///
    /// Rejections: `InvalidSignature` when a signature is present but fails
    /// verification (or is required but absent), `Expired` when the signal
    /// is already older than the validity window. A resubmitted id is
    /// ignored without error.
    pub fn submit(
        &self,
        signal: TradeSignal,
        now: DateTime<Utc>,
        window: Duration,
        require_signatures: bool,
    ) -> SubmitOutcome {
        if signal.signature.is_some() {
            if !self.verifier.verify(&signal) {
                warn!(
                    node_id = %signal.node_id,
                    signal_id = %signal.id,
                    "signal rejected: signature verification failed"
                );
                return SubmitOutcome::Rejected(SubmitRejection::InvalidSignature);
            }
        } else if require_signatures {
            warn!(
                node_id = %signal.node_id,
                signal_id = %signal.id,
                "signal rejected: unsigned submission while signatures required"
            );
            return SubmitOutcome::Rejected(SubmitRejection::InvalidSignature);
        }

        if signal.is_expired(now, window) {
            debug!(
                node_id = %signal.node_id,
                signal_id = %signal.id,
                age_secs = (now - signal.timestamp).num_seconds(),
                "signal rejected: outside validity window"
            );
            return SubmitOutcome::Rejected(SubmitRejection::Expired);
        }

        let bucket = self.bucket(&signal.key());
        let mut signals = bucket.lock();

        if signals.iter().any(|s| s.id == signal.id) {
            debug!(signal_id = %signal.id, "duplicate signal ignored");
            return SubmitOutcome::Duplicate;
        }

        debug!(
            node_id = %signal.node_id,
            key = %signal.key(),
            action = %signal.action,
            confidence = signal.confidence,
            "signal accepted"
        );
        signals.push(signal);
        SubmitOutcome::Accepted {
            pending: signals.len(),
        }
    }

    /// Drop every signal older than the validity window. Returns the number
    /// removed. This is the only expiry enforcement on the periodic path.
    pub fn sweep(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let buckets: Vec<_> = self.buckets.read().values().cloned().collect();
        let mut removed = 0;

        for bucket in buckets {
            let mut signals = bucket.lock();
            let before = signals.len();
            signals.retain(|s| !s.is_expired(now, window));
            removed += before - signals.len();
        }

        if removed > 0 {
            debug!(removed, "expired signals swept");
        }
        removed
    }

    /// Snapshot of live signals, optionally restricted to one symbol.
    pub fn active_signals(&self, symbol: Option<&str>) -> Vec<TradeSignal> {
        let buckets = self.buckets.read();
        let mut out = Vec::new();
        for (key, bucket) in buckets.iter() {
            if let Some(sym) = symbol {
                if key.symbol != sym {
                    continue;
                }
            }
            out.extend(bucket.lock().iter().cloned());
        }
        out
    }

    /// Keys of every currently non-empty bucket, for the sweep's
    /// re-evaluation pass.
    pub fn active_keys(&self) -> Vec<BucketKey> {
        self.buckets
            .read()
            .iter()
            .filter(|(_, b)| !b.lock().is_empty())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Run `f` with exclusive access to the bucket for `key`. The evaluator
    /// uses this so that read-decide-consume happens under one lock.
    pub fn with_bucket<R>(&self, key: &BucketKey, f: impl FnOnce(&mut Vec<TradeSignal>) -> R) -> R {
        let bucket = self.bucket(key);
        let mut signals = bucket.lock();
        f(&mut signals)
    }

    /// Total number of live signals across all buckets.
    pub fn pending_count(&self) -> usize {
        self.buckets
            .read()
            .values()
            .map(|b| b.lock().len())
            .sum()
    }

    /// Number of buckets currently holding at least one signal.
    pub fn active_bucket_count(&self) -> usize {
        self.buckets
            .read()
            .values()
            .filter(|b| !b.lock().is_empty())
            .count()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::NoopVerifier;

    fn ledger() -> SignalLedger {
        SignalLedger::new(Arc::new(NoopVerifier))
    }

    fn signal(id: &str, node: &str, age_secs: i64) -> TradeSignal {
        TradeSignal {
            id: id.to_string(),
            node_id: node.to_string(),
            symbol: "BTC/USD".to_string(),
            timeframe: "15m".to_string(),
            action: SignalAction::Buy,
            confidence: 0.8,
            price: 50_000.0,
            quantity: 0.1,
            timestamp: Utc::now() - Duration::seconds(age_secs),
            signature: None,
        }
    }

    const WINDOW: i64 = 300;

    #[test]
    fn accepts_fresh_signal_and_reports_bucket_size() {
        let ledger = ledger();
        let now = Utc::now();
        let window = Duration::seconds(WINDOW);

        let out = ledger.submit(signal("a", "node-1", 0), now, window, false);
        assert_eq!(out, SubmitOutcome::Accepted { pending: 1 });

        let out = ledger.submit(signal("b", "node-2", 0), now, window, false);
        assert_eq!(out, SubmitOutcome::Accepted { pending: 2 });
    }

    #[test]
    fn rejects_expired_at_submission() {
        let ledger = ledger();
        let now = Utc::now();
        let window = Duration::seconds(WINDOW);

        let out = ledger.submit(signal("a", "node-1", WINDOW + 1), now, window, false);
        assert_eq!(out, SubmitOutcome::Rejected(SubmitRejection::Expired));
        assert_eq!(ledger.pending_count(), 0);
    }

    #[test]
    fn duplicate_id_silently_ignored() {
        let ledger = ledger();
        let now = Utc::now();
        let window = Duration::seconds(WINDOW);

        ledger.submit(signal("a", "node-1", 0), now, window, false);
        let out = ledger.submit(signal("a", "node-1", 0), now, window, false);
        assert_eq!(out, SubmitOutcome::Duplicate);
        assert_eq!(ledger.pending_count(), 1);
    }

    #[test]
    fn unsigned_rejected_when_signatures_required() {
        let ledger = ledger();
        let now = Utc::now();
        let window = Duration::seconds(WINDOW);

        let out = ledger.submit(signal("a", "node-1", 0), now, window, true);
        assert_eq!(
            out,
            SubmitOutcome::Rejected(SubmitRejection::InvalidSignature)
        );
    }

    #[test]
    fn sweep_removes_aged_signals_only() {
        let ledger = ledger();
        let now = Utc::now();
        let window = Duration::seconds(WINDOW);

        // Fresh at submit time; sweep later with advanced clock.
        ledger.submit(signal("a", "node-1", 0), now, window, false);
        ledger.submit(signal("b", "node-2", 200), now, window, false);
        assert_eq!(ledger.pending_count(), 2);

        let later = now + Duration::seconds(150);
        let removed = ledger.sweep(later, window);
        assert_eq!(removed, 1); // "b" is now 350s old
        assert_eq!(ledger.pending_count(), 1);

        let remaining = ledger.active_signals(None);
        assert_eq!(remaining[0].id, "a");
    }

    #[test]
    fn boundary_signal_exactly_at_window_survives() {
        let ledger = ledger();
        let now = Utc::now();
        let window = Duration::seconds(WINDOW);

        // Exactly window old: `now - ts > window` is false.
        let out = ledger.submit(signal("a", "node-1", WINDOW), now, window, false);
        assert!(matches!(out, SubmitOutcome::Accepted { .. }));
        assert_eq!(ledger.sweep(now, window), 0);
    }

    #[test]
    fn active_signals_filters_by_symbol() {
        let ledger = ledger();
        let now = Utc::now();
        let window = Duration::seconds(WINDOW);

        ledger.submit(signal("a", "node-1", 0), now, window, false);
        let mut eth = signal("b", "node-2", 0);
        eth.symbol = "ETH/USD".to_string();
        ledger.submit(eth, now, window, false);

        assert_eq!(ledger.active_signals(Some("BTC/USD")).len(), 1);
        assert_eq!(ledger.active_signals(Some("ETH/USD")).len(), 1);
        assert_eq!(ledger.active_signals(None).len(), 2);
        assert_eq!(ledger.active_bucket_count(), 2);
    }

    #[test]
    fn with_bucket_consumes_atomically() {
        let ledger = ledger();
        let now = Utc::now();
        let window = Duration::seconds(WINDOW);

        ledger.submit(signal("a", "node-1", 0), now, window, false);
        ledger.submit(signal("b", "node-2", 0), now, window, false);

        let key = BucketKey::new("BTC/USD", "15m");
        let taken = ledger.with_bucket(&key, |signals| std::mem::take(signals));
        assert_eq!(taken.len(), 2);
        assert_eq!(ledger.pending_count(), 0);
    }
}
