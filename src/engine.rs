// =============================================================================
// Consensus Engine — central facade over ledger, reputation, and evaluator
// =============================================================================
//
// The single entry point collaborators talk to. All subsystems hold Arc
// references to their own state; ConsensusEngine ties them together and
// exposes the inbound operations plus a unified snapshot for the API.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - One mutex per signal bucket, one RwLock over the reputation map.
//   - Arc wrappers for subsystems that manage their own interior mutability.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::consensus::{ConsensusEvaluator, ConsensusMetrics, ConsensusResult};
use crate::engine_config::EngineConfig;
use crate::events::{EngineEvent, EventBus};
use crate::ledger::{SignalLedger, SubmitOutcome, TradeSignal};
use crate::reputation::{
    FeedbackApplier, NodeReputation, ReputationMetrics, ReputationStore, ReputationUpdate, Tier,
};
use crate::types::BucketKey;
use crate::verify::SignatureVerifier;

// =============================================================================
// Public types
// =============================================================================

/// What a submission produced: the ledger outcome, plus the consensus result
/// when the submission immediately completed a round.
#[derive(Debug, Clone)]
pub struct SubmitResult {
    pub outcome: SubmitOutcome,
    pub consensus: Option<ConsensusResult>,
}

/// Serialisable engine-wide snapshot for the REST surface.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub event_subscribers: usize,
    pub consensus: ConsensusMetrics,
    pub reputation: ReputationMetrics,
    pub config: EngineConfig,
}

// =============================================================================
// ConsensusEngine
// =============================================================================

/// Central engine state shared across all async tasks via `Arc`.
pub struct ConsensusEngine {
    /// Monotonically increasing version counter, incremented on every
    /// meaningful mutation. The API uses it for change detection.
    pub state_version: AtomicU64,

    pub config: Arc<RwLock<EngineConfig>>,
    pub ledger: Arc<SignalLedger>,
    pub reputation: Arc<ReputationStore>,
    pub evaluator: Arc<ConsensusEvaluator>,
    pub events: EventBus,
    feedback: FeedbackApplier,

    pub start_time: std::time::Instant,
}

impl ConsensusEngine {
    /// Construct the engine from a validated configuration and an injected
    /// signature verifier. Call `EngineConfig::validate` first; this
    /// constructor assumes the config is sane.
    pub fn new(config: EngineConfig, verifier: Arc<dyn SignatureVerifier>) -> Self {
        let events = EventBus::new();
        let config = Arc::new(RwLock::new(config));
        let ledger = Arc::new(SignalLedger::new(verifier));
        let reputation = Arc::new(ReputationStore::new(&config.read(), events.clone()));
        let evaluator = Arc::new(ConsensusEvaluator::new(
            config.clone(),
            ledger.clone(),
            reputation.clone(),
            events.clone(),
        ));
        let feedback = FeedbackApplier::new(reputation.clone());

        info!("ConsensusEngine initialised");

        Self {
            state_version: AtomicU64::new(1),
            config,
            ledger,
            reputation,
            evaluator,
            events,
            feedback,
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Inbound operations ──────────────────────────────────────────────

    /// Idempotent node registration.
    pub fn register_node(&self, node_id: &str) -> bool {
        let created = self.reputation.register_node(node_id);
        if created {
            self.increment_version();
        }
        created
    }

    /// Validate and record a signal, then immediately evaluate its bucket
    /// (the low-latency trigger path).
    pub fn submit_signal(&self, signal: TradeSignal) -> SubmitResult {
        self.submit_signal_at(signal, Utc::now())
    }

    /// Clock-injected variant of `submit_signal`.
    pub fn submit_signal_at(&self, signal: TradeSignal, now: DateTime<Utc>) -> SubmitResult {
        let (window, require_signatures) = {
            let cfg = self.config.read();
            (cfg.validity_window(), cfg.require_signatures)
        };

        let key = signal.key();
        let node_id = signal.node_id.clone();
        let accepted_signal = signal.clone();

        let outcome = self
            .ledger
            .submit(signal, now, window, require_signatures);

        let consensus = match outcome {
            SubmitOutcome::Accepted { pending } => {
                self.reputation.note_signal_submitted(&node_id, now);
                self.events.publish(EngineEvent::SignalSubmitted {
                    signal: accepted_signal,
                    pending,
                });
                self.increment_version();
                self.evaluate_key(&key, now)
            }
            SubmitOutcome::Duplicate | SubmitOutcome::Rejected(_) => None,
        };

        SubmitResult { outcome, consensus }
    }

    /// Evaluate one bucket now.
    pub fn evaluate_key(&self, key: &BucketKey, now: DateTime<Utc>) -> Option<ConsensusResult> {
        let result = self.evaluator.evaluate(key, now);
        if result.is_some() {
            self.increment_version();
        }
        result
    }

    /// The safety-net path: expire stale signals, then re-evaluate every
    /// non-empty bucket.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let window = self.config.read().validity_window();
        let removed = self.ledger.sweep(now, window);
        if removed > 0 {
            self.increment_version();
        }
        for key in self.ledger.active_keys() {
            self.evaluate_key(&key, now);
        }
    }

    /// Periodic reputation decay pass.
    pub fn apply_decay(&self, now: DateTime<Utc>) {
        if self.reputation.apply_decay(now) > 0 {
            self.increment_version();
        }
    }

    // ── Supplemental feedback flows ─────────────────────────────────────

    /// Record the eventual outcome of a node's signal (accuracy,
    /// profitability, quality), reported by the execution collaborator.
    pub fn record_signal_outcome(
        &self,
        node_id: &str,
        accurate: bool,
        profitable: bool,
        quality: f64,
    ) {
        self.feedback
            .apply_signal_outcome(node_id, accurate, profitable, quality);
        self.increment_version();
    }

    /// Penalize a node that stayed silent in a round it was expected to
    /// vote in. The collaborator tracking round membership decides when.
    pub fn record_missed_round(&self, node_id: &str) {
        self.feedback.apply_missed_round(node_id);
        self.increment_version();
    }

    /// Record a node's infrastructure behaviour (uptime, latency, data
    /// contribution).
    pub fn record_network_contribution(
        &self,
        node_id: &str,
        uptime_fraction: f64,
        mean_response_ms: f64,
        contributed_bytes: u64,
    ) {
        self.feedback.apply_network_contribution(
            node_id,
            uptime_fraction,
            mean_response_ms,
            contributed_bytes,
        );
        self.increment_version();
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub fn active_signals(&self, symbol: Option<&str>) -> Vec<TradeSignal> {
        self.ledger.active_signals(symbol)
    }

    pub fn consensus_history(
        &self,
        symbol: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<ConsensusResult> {
        self.evaluator.history(symbol, limit)
    }

    pub fn node_reputation(&self, node_id: &str) -> Option<NodeReputation> {
        self.reputation.node(node_id)
    }

    pub fn node_history(&self, node_id: &str, limit: usize) -> Vec<ReputationUpdate> {
        self.reputation.node_history(node_id, limit)
    }

    /// All known nodes, sorted by score descending.
    pub fn all_reputations(&self) -> Vec<NodeReputation> {
        self.reputation.all_nodes()
    }

    pub fn nodes_by_tier(&self, tier: Tier) -> Vec<String> {
        self.reputation.nodes_by_tier(tier)
    }

    /// Trust check; defaults to the Trusted tier when none is given.
    pub fn is_node_trusted(&self, node_id: &str, min_tier: Option<Tier>) -> bool {
        self.reputation
            .is_trusted(node_id, min_tier.unwrap_or(Tier::Trusted))
    }

    pub fn consensus_metrics(&self) -> ConsensusMetrics {
        self.evaluator.metrics()
    }

    pub fn reputation_metrics(&self) -> ReputationMetrics {
        self.reputation.metrics()
    }

    /// Complete serialisable snapshot for the REST `GET /api/v1/state`
    /// endpoint.
    pub fn build_snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            event_subscribers: self.events.subscriber_count(),
            consensus: self.consensus_metrics(),
            reputation: self.reputation_metrics(),
            config: self.config.read().clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
