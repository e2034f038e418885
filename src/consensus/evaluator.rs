// =============================================================================
// Consensus Evaluator — trust-weighted voting per (symbol, timeframe) bucket
// =============================================================================
//
// Reads the signal ledger and the reputation store, tallies weighted votes,
// and either produces a ConsensusResult (consuming the bucket) or leaves the
// bucket untouched for more signals to arrive.
//
// The read-decide-consume sequence runs under the bucket's mutex, so the
// submit-triggered path and the periodic sweep can never double-count the
// same signals.
//
// Tie policy: two actions with exactly equal summed weight yield no
// consensus for this evaluation. Deterministic by construction — the
// insertion order of signals never influences the outcome.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine_config::EngineConfig;
use crate::events::{EngineEvent, EventBus};
use crate::ledger::{SignalLedger, TradeSignal};
use crate::reputation::{FeedbackApplier, ReputationStore};
use crate::types::{BucketKey, SignalAction};

/// Weight given to `confidence` for a node the store has never seen.
const DEFAULT_REPUTATION: f64 = 0.5;

// =============================================================================
// Public types
// =============================================================================

/// Immutable outcome of one successful evaluation round.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusResult {
    pub consensus_id: String,
    pub symbol: String,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    pub action: SignalAction,
    /// Mean confidence of the majority voters, scaled by the consensus ratio.
    pub confidence: f64,
    pub participating_nodes: usize,
    /// The signals consumed by this round.
    pub signals: Vec<TradeSignal>,
    /// Summed voting weight per node, as used in the tally.
    pub weights: HashMap<String, f64>,
    pub achieved: bool,
}

/// Aggregate view of the consensus subsystem. Pure read.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusMetrics {
    pub live_signals: usize,
    pub active_buckets: usize,
    pub rounds_achieved: usize,
    pub last_consensus_at: Option<DateTime<Utc>>,
    pub registered_nodes: usize,
    /// Advisory: whether the current node count clears the 3f+1 bar for the
    /// configured byzantine_tolerance.
    pub byzantine_tolerant: bool,
}

// =============================================================================
// Pure tally
// =============================================================================

/// Outcome of the weighted tally over one bucket's live signals.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Tally {
    pub action: SignalAction,
    pub majority_weight: f64,
    pub total_weight: f64,
    pub consensus_ratio: f64,
    /// Per-node summed weights, every counted signal included.
    pub weights: HashMap<String, f64>,
    /// Indices into the input slice of the signals actually counted.
    pub counted: Vec<usize>,
}

/// Tally weighted votes. Pure: same signals + same score lookup = same
/// result, every time. Returns `None` on an exact tie between the top two
/// actions or when nothing was countable.
pub(crate) fn tally_votes(
    signals: &[TradeSignal],
    use_reputation: bool,
    score_of: impl Fn(&str) -> Option<f64>,
) -> Option<Tally> {
    let mut action_weights: HashMap<SignalAction, f64> = HashMap::new();
    let mut node_weights: HashMap<String, f64> = HashMap::new();
    let mut counted = Vec::new();

    for (idx, signal) in signals.iter().enumerate() {
        // One malformed signal must not block consensus for everyone else.
        if !signal.confidence.is_finite() || !(0.0..=1.0).contains(&signal.confidence) {
            warn!(
                signal_id = %signal.id,
                node_id = %signal.node_id,
                confidence = signal.confidence,
                "skipping signal with malformed confidence"
            );
            continue;
        }

        let weight = if use_reputation {
            let reputation = score_of(&signal.node_id).unwrap_or(DEFAULT_REPUTATION);
            reputation * signal.confidence
        } else {
            1.0
        };

        *action_weights.entry(signal.action).or_insert(0.0) += weight;
        *node_weights.entry(signal.node_id.clone()).or_insert(0.0) += weight;
        counted.push(idx);
    }

    let total_weight: f64 = action_weights.values().sum();
    if counted.is_empty() || total_weight <= 0.0 {
        return None;
    }

    let (&majority_action, &majority_weight) = action_weights
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;

    // Exact tie between top actions: no majority this round.
    let tied = action_weights
        .iter()
        .any(|(action, weight)| *action != majority_action && *weight == majority_weight);
    if tied {
        debug!(weight = majority_weight, "tie between top actions, no majority");
        return None;
    }

    Some(Tally {
        action: majority_action,
        majority_weight,
        total_weight,
        consensus_ratio: majority_weight / total_weight,
        weights: node_weights,
        counted,
    })
}

// =============================================================================
// Evaluator
// =============================================================================

/// Weighted-voting state machine over the signal ledger.
pub struct ConsensusEvaluator {
    config: Arc<RwLock<EngineConfig>>,
    ledger: Arc<SignalLedger>,
    store: Arc<ReputationStore>,
    feedback: FeedbackApplier,
    events: EventBus,
    history: RwLock<Vec<ConsensusResult>>,
}

impl ConsensusEvaluator {
    pub fn new(
        config: Arc<RwLock<EngineConfig>>,
        ledger: Arc<SignalLedger>,
        store: Arc<ReputationStore>,
        events: EventBus,
    ) -> Self {
        let feedback = FeedbackApplier::new(store.clone());
        Self {
            config,
            ledger,
            store,
            feedback,
            events,
            history: RwLock::new(Vec::new()),
        }
    }

    /// Evaluate one bucket. Returns the recorded result when consensus is
    /// achieved; `None` is the normal waiting state (insufficient quorum,
    /// tie, or below threshold) and has no side effects.
    pub fn evaluate(&self, key: &BucketKey, now: DateTime<Utc>) -> Option<ConsensusResult> {
        let (min_nodes, threshold, use_reputation, window) = {
            let cfg = self.config.read();
            (
                cfg.min_nodes,
                cfg.consensus_threshold,
                cfg.use_reputation,
                cfg.validity_window(),
            )
        };

        // Read, decide, and consume under the bucket's own lock.
        let result = self.ledger.with_bucket(key, |signals| {
            let live: Vec<TradeSignal> = signals
                .iter()
                .filter(|s| !s.is_expired(now, window))
                .cloned()
                .collect();

            let distinct_nodes = {
                let mut nodes: Vec<&str> = live.iter().map(|s| s.node_id.as_str()).collect();
                nodes.sort_unstable();
                nodes.dedup();
                nodes.len()
            };
            if distinct_nodes < min_nodes {
                return None;
            }

            let tally = tally_votes(&live, use_reputation, |node_id| {
                self.store.score_of(node_id)
            })?;

            if tally.consensus_ratio < threshold {
                debug!(
                    key = %key,
                    ratio = tally.consensus_ratio,
                    threshold,
                    "below consensus threshold, bucket left intact"
                );
                return None;
            }

            // Consensus achieved: consume the bucket.
            let counted: Vec<TradeSignal> =
                tally.counted.iter().map(|&i| live[i].clone()).collect();
            signals.clear();

            let majority_confidences: Vec<f64> = counted
                .iter()
                .filter(|s| s.action == tally.action)
                .map(|s| s.confidence)
                .collect();
            let mean_confidence =
                majority_confidences.iter().sum::<f64>() / majority_confidences.len() as f64;

            let result = ConsensusResult {
                consensus_id: Uuid::new_v4().to_string(),
                symbol: key.symbol.clone(),
                timeframe: key.timeframe.clone(),
                timestamp: now,
                action: tally.action,
                confidence: mean_confidence * tally.consensus_ratio,
                participating_nodes: tally.weights.len(),
                signals: counted,
                weights: tally.weights,
                achieved: true,
            };

            // Record, publish, and apply feedback while the bucket mutex is
            // still held: a racing round N+1 for this key cannot append to
            // history or reach subscribers before round N.
            self.history.write().push(result.clone());
            self.events
                .publish(EngineEvent::ConsensusAchieved(result.clone()));
            self.feedback.apply_round(&result);

            Some(result)
        })?;

        info!(
            consensus_id = %result.consensus_id,
            key = %key,
            action = %result.action,
            confidence = result.confidence,
            participants = result.participating_nodes,
            "consensus achieved"
        );

        Some(result)
    }

    /// Advisory 3f+1 check: can `node_count` participants absorb the
    /// configured number of faulty nodes?
    ///
    /// Signed floor division: an empty network yields floor(-1/3) = -1, so
    /// zero nodes are never tolerant, even at tolerance 0.
    pub fn is_byzantine_tolerant(&self, node_count: usize) -> bool {
        let tolerance = self.config.read().byzantine_tolerance;
        (node_count as i64 - 1).div_euclid(3) >= tolerance as i64
    }

    /// Most recent results, oldest first, optionally filtered by symbol.
    pub fn history(&self, symbol: Option<&str>, limit: Option<usize>) -> Vec<ConsensusResult> {
        let history = self.history.read();
        let filtered: Vec<ConsensusResult> = history
            .iter()
            .filter(|r| symbol.map_or(true, |s| r.symbol == s))
            .cloned()
            .collect();
        match limit {
            Some(n) => {
                let start = filtered.len().saturating_sub(n);
                filtered[start..].to_vec()
            }
            None => filtered,
        }
    }

    pub fn metrics(&self) -> ConsensusMetrics {
        let history = self.history.read();
        let node_count = self.store.node_count();
        ConsensusMetrics {
            live_signals: self.ledger.pending_count(),
            active_buckets: self.ledger.active_bucket_count(),
            rounds_achieved: history.len(),
            last_consensus_at: history.last().map(|r| r.timestamp),
            registered_nodes: node_count,
            byzantine_tolerant: self.is_byzantine_tolerant(node_count),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
