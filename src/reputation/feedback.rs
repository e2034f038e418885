// =============================================================================
// Feedback Applier — reputation updates driven by engine outcomes
// =============================================================================
//
// The three named update flows. Each composes the store's `apply_delta` with
// domain-specific factors; the factors of an update always sum to its delta,
// so the audit trail explains every score move.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::consensus::ConsensusResult;
use crate::reputation::store::{ReputationStore, UpdateFactor, UpdateReason};

// --- Signal performance ------------------------------------------------------
const ACCURACY_REWARD: f64 = 0.02;
const PROFITABILITY_REWARD: f64 = 0.05;
const QUALITY_SCALE: f64 = 0.02;

// --- Consensus participation -------------------------------------------------
const PARTICIPATION_REWARD: f64 = 0.01;
const SILENT_PENALTY: f64 = 0.005;
const AGREEMENT_REWARD: f64 = 0.05;
const DISAGREEMENT_PENALTY: f64 = 0.03;

// --- Network contribution ----------------------------------------------------
const UPTIME_BASELINE: f64 = 0.95;
const UPTIME_SCALE: f64 = 0.2;
const RESPONSE_TIME_BAR_MS: f64 = 1_000.0;
const RESPONSE_BONUS: f64 = 0.01;
const CONTRIBUTION_PER_MB: f64 = 0.001;
const CONTRIBUTION_CAP: f64 = 0.02;

/// Applies reputation feedback for engine outcomes.
pub struct FeedbackApplier {
    store: Arc<ReputationStore>,
}

impl FeedbackApplier {
    pub fn new(store: Arc<ReputationStore>) -> Self {
        Self { store }
    }

    // -------------------------------------------------------------------------
    // Consensus round feedback
    // -------------------------------------------------------------------------

    /// Update every participant of a completed round: small participation
    /// reward for voting, agreement reward when the vote matched the
    /// majority, smaller penalty when it did not.
    pub fn apply_round(&self, result: &ConsensusResult) {
        let now = Utc::now();

        for signal in &result.signals {
            let agreed = signal.action == result.action;

            self.store.update_performance(&signal.node_id, |p| {
                p.consensus_participations += 1;
                if agreed {
                    p.consensus_agreements += 1;
                }
                p.last_active = now;
            });

            let agreement = if agreed {
                AGREEMENT_REWARD
            } else {
                -DISAGREEMENT_PENALTY
            };
            let change = PARTICIPATION_REWARD + agreement;

            self.store.apply_delta(
                &signal.node_id,
                change,
                UpdateReason::ConsensusParticipation,
                vec![
                    UpdateFactor::new("participation", PARTICIPATION_REWARD),
                    UpdateFactor::new("agreement", agreement),
                ],
            );
        }

        debug!(
            consensus_id = %result.consensus_id,
            participants = result.signals.len(),
            action = %result.action,
            "round feedback applied"
        );
    }

    /// Penalize a node that was expected to vote in a round but stayed
    /// silent. Callers decide what "expected" means.
    pub fn apply_missed_round(&self, node_id: &str) {
        self.store.apply_delta(
            node_id,
            -SILENT_PENALTY,
            UpdateReason::ConsensusParticipation,
            vec![UpdateFactor::new("participation", -SILENT_PENALTY)],
        );
    }

    // -------------------------------------------------------------------------
    // Signal performance feedback
    // -------------------------------------------------------------------------

    /// Record the eventual outcome of one of a node's signals, once the
    /// collaborator that tracks trade results knows it.
    ///
    /// `quality` is a [0, 1] assessment of the signal; 0.5 is neutral.
    pub fn apply_signal_outcome(
        &self,
        node_id: &str,
        accurate: bool,
        profitable: bool,
        quality: f64,
    ) {
        let quality = quality.clamp(0.0, 1.0);

        self.store.update_performance(node_id, |p| {
            if accurate {
                p.accurate_signals += 1;
            }
            if profitable {
                p.profitable_signals += 1;
            }
            // Running average over every scored outcome, whatever its result.
            p.scored_signals += 1;
            p.average_quality += (quality - p.average_quality) / p.scored_signals as f64;
        });

        let accuracy = if accurate {
            ACCURACY_REWARD
        } else {
            -ACCURACY_REWARD
        };
        let profitability = if profitable {
            PROFITABILITY_REWARD
        } else {
            -PROFITABILITY_REWARD
        };
        let quality_factor = (quality - 0.5) * QUALITY_SCALE;

        self.store.apply_delta(
            node_id,
            accuracy + profitability + quality_factor,
            UpdateReason::SignalPerformance,
            vec![
                UpdateFactor::new("accuracy", accuracy),
                UpdateFactor::new("profitability", profitability),
                UpdateFactor::new("quality", quality_factor),
            ],
        );
    }

    // -------------------------------------------------------------------------
    // Network contribution feedback
    // -------------------------------------------------------------------------

    /// Reward or penalize a node's infrastructure behaviour: uptime against
    /// a 95 % baseline, response time against a fixed latency bar, and data
    /// contribution capped per update so volume cannot buy reputation.
    pub fn apply_network_contribution(
        &self,
        node_id: &str,
        uptime_fraction: f64,
        mean_response_ms: f64,
        contributed_bytes: u64,
    ) {
        let uptime_fraction = uptime_fraction.clamp(0.0, 1.0);

        self.store.update_performance(node_id, |p| {
            p.uptime_fraction = uptime_fraction;
            p.mean_response_ms = mean_response_ms;
            p.data_contributed_bytes += contributed_bytes;
        });

        let uptime = (uptime_fraction - UPTIME_BASELINE) * UPTIME_SCALE;
        let response = if mean_response_ms <= RESPONSE_TIME_BAR_MS {
            RESPONSE_BONUS
        } else {
            -RESPONSE_BONUS
        };
        let contribution =
            ((contributed_bytes as f64 / 1_048_576.0) * CONTRIBUTION_PER_MB).min(CONTRIBUTION_CAP);

        self.store.apply_delta(
            node_id,
            uptime + response + contribution,
            UpdateReason::NetworkContribution,
            vec![
                UpdateFactor::new("uptime", uptime),
                UpdateFactor::new("response_time", response),
                UpdateFactor::new("contribution", contribution),
            ],
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusResult;
    use crate::engine_config::EngineConfig;
    use crate::events::EventBus;
    use crate::ledger::TradeSignal;
    use crate::types::SignalAction;
    use std::collections::HashMap;

    fn setup() -> (Arc<ReputationStore>, FeedbackApplier) {
        let store = Arc::new(ReputationStore::new(
            &EngineConfig::default(),
            EventBus::new(),
        ));
        let applier = FeedbackApplier::new(store.clone());
        (store, applier)
    }

    fn signal(node: &str, action: SignalAction) -> TradeSignal {
        TradeSignal {
            id: format!("{node}-sig"),
            node_id: node.to_string(),
            symbol: "BTC/USD".to_string(),
            timeframe: "15m".to_string(),
            action,
            confidence: 0.8,
            price: 50_000.0,
            quantity: 0.1,
            timestamp: Utc::now(),
            signature: None,
        }
    }

    fn round(signals: Vec<TradeSignal>, action: SignalAction) -> ConsensusResult {
        ConsensusResult {
            consensus_id: "round-1".to_string(),
            symbol: "BTC/USD".to_string(),
            timeframe: "15m".to_string(),
            timestamp: Utc::now(),
            action,
            confidence: 0.7,
            participating_nodes: signals.len(),
            weights: HashMap::new(),
            signals,
            achieved: true,
        }
    }

    #[test]
    fn round_rewards_agreement_and_penalizes_disagreement() {
        let (store, applier) = setup();
        store.register_node("agree");
        store.register_node("disagree");

        let result = round(
            vec![
                signal("agree", SignalAction::Buy),
                signal("disagree", SignalAction::Sell),
            ],
            SignalAction::Buy,
        );
        applier.apply_round(&result);

        // agree: 0.5 + 0.01 + 0.05 = 0.56; disagree: 0.5 + 0.01 - 0.03 = 0.48
        assert!((store.score_of("agree").unwrap() - 0.56).abs() < 1e-12);
        assert!((store.score_of("disagree").unwrap() - 0.48).abs() < 1e-12);

        let agree = store.node("agree").unwrap();
        assert_eq!(agree.performance.consensus_participations, 1);
        assert_eq!(agree.performance.consensus_agreements, 1);

        let disagree = store.node("disagree").unwrap();
        assert_eq!(disagree.performance.consensus_participations, 1);
        assert_eq!(disagree.performance.consensus_agreements, 0);
    }

    #[test]
    fn missed_round_applies_small_penalty() {
        let (store, applier) = setup();
        store.register_node("silent");
        applier.apply_missed_round("silent");
        assert!((store.score_of("silent").unwrap() - 0.495).abs() < 1e-12);
    }

    #[test]
    fn signal_outcome_factors_sum_to_delta() {
        let (store, applier) = setup();
        store.register_node("node-a");

        applier.apply_signal_outcome("node-a", true, true, 1.0);
        // +0.02 + 0.05 + (1.0-0.5)*0.02 = +0.08
        assert!((store.score_of("node-a").unwrap() - 0.58).abs() < 1e-12);

        let history = store.node_history("node-a", 1);
        let sum: f64 = history[0].factors.iter().map(|f| f.value).sum();
        assert!((sum - (history[0].new_score - history[0].previous_score)).abs() < 1e-12);
    }

    #[test]
    fn bad_signal_outcome_penalizes() {
        let (store, applier) = setup();
        store.register_node("node-a");

        applier.apply_signal_outcome("node-a", false, false, 0.5);
        // -0.02 - 0.05 + 0 = -0.07
        assert!((store.score_of("node-a").unwrap() - 0.43).abs() < 1e-12);

        let node = store.node("node-a").unwrap();
        assert_eq!(node.performance.accurate_signals, 0);
        assert_eq!(node.performance.profitable_signals, 0);
    }

    #[test]
    fn average_quality_counts_every_scored_outcome_once() {
        let (store, applier) = setup();
        store.register_node("node-a");

        // A fully good outcome and a fully bad one each count exactly once,
        // regardless of how many result flags they carry.
        applier.apply_signal_outcome("node-a", true, true, 0.8);
        applier.apply_signal_outcome("node-a", false, false, 0.2);

        let node = store.node("node-a").unwrap();
        assert_eq!(node.performance.scored_signals, 2);
        assert!((node.performance.average_quality - 0.5).abs() < 1e-12);

        applier.apply_signal_outcome("node-a", true, false, 0.5);
        let node = store.node("node-a").unwrap();
        assert_eq!(node.performance.scored_signals, 3);
        assert!((node.performance.average_quality - 0.5).abs() < 1e-12);
    }

    #[test]
    fn network_contribution_is_capped() {
        let (store, applier) = setup();
        store.register_node("node-a");

        // Perfect uptime, fast response, absurd contribution volume.
        applier.apply_network_contribution("node-a", 1.0, 100.0, u64::MAX / 2);
        // (1.0-0.95)*0.2 + 0.01 + 0.02 (cap) = 0.04
        assert!((store.score_of("node-a").unwrap() - 0.54).abs() < 1e-12);
    }

    #[test]
    fn poor_uptime_and_latency_penalize() {
        let (store, applier) = setup();
        store.register_node("node-a");

        applier.apply_network_contribution("node-a", 0.5, 5_000.0, 0);
        // (0.5-0.95)*0.2 - 0.01 + 0 = -0.1
        assert!((store.score_of("node-a").unwrap() - 0.4).abs() < 1e-12);

        let node = store.node("node-a").unwrap();
        assert!((node.performance.uptime_fraction - 0.5).abs() < 1e-12);
        assert!((node.performance.mean_response_ms - 5_000.0).abs() < 1e-12);
    }
}
