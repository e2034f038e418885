// =============================================================================
// Reputation Store — per-node trust scores, counters, and audit history
// =============================================================================
//
// The single owner of all reputation state. Every score mutation goes through
// `apply_delta`, which clamps into [min_score, max_score], appends an audit
// record, and emits events. No caller can move a score out of bounds.
//
// One RwLock guards the whole node map: two reputation updates for the same
// node can never interleave. The per-key contention argument from the signal
// ledger does not apply here — reputation updates are orders of magnitude
// rarer than signal reads.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine_config::EngineConfig;
use crate::events::{EngineEvent, EventBus};
use crate::reputation::tier::Tier;

/// Flat penalty applied to nodes below the activity threshold per decay pass.
const LOW_ACTIVITY_PENALTY: f64 = 0.01;

// =============================================================================
// Public types
// =============================================================================

/// Why a score changed. Closed set; the audit trail depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateReason {
    SignalPerformance,
    ConsensusParticipation,
    NetworkContribution,
    InactivityDecay,
    LowActivity,
}

impl std::fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignalPerformance => write!(f, "signal_performance"),
            Self::ConsensusParticipation => write!(f, "consensus_participation"),
            Self::NetworkContribution => write!(f, "network_contribution"),
            Self::InactivityDecay => write!(f, "inactivity_decay"),
            Self::LowActivity => write!(f, "low_activity"),
        }
    }
}

/// One named numeric contribution to a score change. The factors of an
/// update sum to its (pre-clamp) delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFactor {
    pub name: String,
    pub value: f64,
}

impl UpdateFactor {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Audit record of one score change. Append-only; the core never prunes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationUpdate {
    pub node_id: String,
    pub previous_score: f64,
    pub new_score: f64,
    pub reason: UpdateReason,
    pub factors: Vec<UpdateFactor>,
    pub timestamp: DateTime<Utc>,
}

/// Performance counters tracked per node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceCounters {
    pub total_signals: u64,
    pub accurate_signals: u64,
    pub profitable_signals: u64,
    /// Number of signals with a reported outcome; the denominator of
    /// `average_quality`.
    pub scored_signals: u64,
    /// Running average of reported signal quality in [0, 1].
    pub average_quality: f64,
    /// Most recently reported uptime fraction in [0, 1].
    pub uptime_fraction: f64,
    /// Most recently reported mean response time, milliseconds.
    pub mean_response_ms: f64,
    /// Cumulative data contribution, bytes.
    pub data_contributed_bytes: u64,
    pub consensus_participations: u64,
    pub consensus_agreements: u64,
    /// Signals submitted since the previous decay pass; reset by each pass.
    pub signals_since_decay: u64,
    pub last_active: DateTime<Utc>,
    pub joined_at: DateTime<Utc>,
}

impl PerformanceCounters {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_signals: 0,
            accurate_signals: 0,
            profitable_signals: 0,
            scored_signals: 0,
            average_quality: 0.0,
            uptime_fraction: 1.0,
            mean_response_ms: 0.0,
            data_contributed_bytes: 0,
            consensus_participations: 0,
            consensus_agreements: 0,
            signals_since_decay: 0,
            last_active: now,
            joined_at: now,
        }
    }
}

/// Serialisable per-node snapshot returned by the read API. History is
/// exposed separately (`node_history`) because it is unbounded.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReputation {
    pub node_id: String,
    pub score: f64,
    pub tier: Tier,
    pub performance: PerformanceCounters,
    pub update_count: usize,
}

/// Aggregate view of the whole store. Pure read.
#[derive(Debug, Clone, Serialize)]
pub struct ReputationMetrics {
    pub node_count: usize,
    pub mean_score: f64,
    pub median_score: f64,
    pub tier_counts: BTreeMap<String, usize>,
    pub active_last_24h: usize,
}

// =============================================================================
// Internal state
// =============================================================================

struct NodeRecord {
    score: f64,
    performance: PerformanceCounters,
    history: Vec<ReputationUpdate>,
}

// =============================================================================
// ReputationStore
// =============================================================================

/// Owner of all per-node reputation state.
pub struct ReputationStore {
    nodes: RwLock<HashMap<String, NodeRecord>>,
    events: EventBus,
    initial_score: f64,
    min_score: f64,
    max_score: f64,
    decay_rate_pct_per_day: f64,
    min_activity_threshold: u64,
}

impl ReputationStore {
    pub fn new(config: &EngineConfig, events: EventBus) -> Self {
        info!(
            initial_score = config.initial_score,
            min_score = config.min_score,
            max_score = config.max_score,
            decay_rate_pct_per_day = config.decay_rate_pct_per_day,
            "ReputationStore initialised"
        );

        Self {
            nodes: RwLock::new(HashMap::new()),
            events,
            initial_score: config.initial_score,
            min_score: config.min_score,
            max_score: config.max_score,
            decay_rate_pct_per_day: config.decay_rate_pct_per_day,
            min_activity_threshold: config.min_activity_threshold,
        }
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Idempotent. Returns `true` if the node was newly created.
    pub fn register_node(&self, node_id: &str) -> bool {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(node_id) {
            return false;
        }

        let now = Utc::now();
        nodes.insert(
            node_id.to_string(),
            NodeRecord {
                score: self.initial_score,
                performance: PerformanceCounters::new(now),
                history: Vec::new(),
            },
        );

        info!(node_id, score = self.initial_score, "node registered");
        self.events.publish(EngineEvent::NodeRegistered {
            node_id: node_id.to_string(),
        });
        true
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.read().contains_key(node_id)
    }

    // -------------------------------------------------------------------------
    // The single mutation primitive
    // -------------------------------------------------------------------------

    /// Apply a score change: clamp into bounds, append the audit record,
    /// emit `ReputationUpdated` and, if the tier boundary was crossed,
    /// `TierChanged`. Unknown nodes are registered first (a node exists from
    /// its first observed activity).
    pub fn apply_delta(
        &self,
        node_id: &str,
        change: f64,
        reason: UpdateReason,
        factors: Vec<UpdateFactor>,
    ) -> ReputationUpdate {
        if !self.contains(node_id) {
            self.register_node(node_id);
        }

        let mut nodes = self.nodes.write();
        // Entry exists: registered above, and nothing removes nodes.
        let record = nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeRecord {
                score: self.initial_score,
                performance: PerformanceCounters::new(Utc::now()),
                history: Vec::new(),
            });

        let previous_score = record.score;
        let previous_tier = Tier::for_score(previous_score, self.max_score);

        record.score = (previous_score + change).clamp(self.min_score, self.max_score);
        let new_tier = Tier::for_score(record.score, self.max_score);

        let update = ReputationUpdate {
            node_id: node_id.to_string(),
            previous_score,
            new_score: record.score,
            reason,
            factors,
            timestamp: Utc::now(),
        };
        record.history.push(update.clone());

        debug!(
            node_id,
            change,
            previous = previous_score,
            new = record.score,
            reason = %reason,
            "reputation delta applied"
        );

        // Publish while still holding the write lock so the event stream
        // matches mutation order.
        self.events
            .publish(EngineEvent::ReputationUpdated(update.clone()));
        if new_tier != previous_tier {
            info!(
                node_id,
                previous = %previous_tier,
                current = %new_tier,
                score = record.score,
                "tier changed"
            );
            self.events.publish(EngineEvent::TierChanged {
                node_id: node_id.to_string(),
                previous: previous_tier,
                current: new_tier,
                score: record.score,
            });
        }

        update
    }

    // -------------------------------------------------------------------------
    // Counter updates (no score change)
    // -------------------------------------------------------------------------

    /// Record an accepted signal submission for activity tracking.
    pub fn note_signal_submitted(&self, node_id: &str, now: DateTime<Utc>) {
        if !self.contains(node_id) {
            self.register_node(node_id);
        }
        let mut nodes = self.nodes.write();
        if let Some(record) = nodes.get_mut(node_id) {
            record.performance.total_signals += 1;
            record.performance.signals_since_decay += 1;
            record.performance.last_active = now;
        }
    }

    /// Mutate a node's performance counters in place. Used by the feedback
    /// flows to keep counters and score deltas in one subsystem.
    pub(crate) fn update_performance(
        &self,
        node_id: &str,
        f: impl FnOnce(&mut PerformanceCounters),
    ) {
        if !self.contains(node_id) {
            self.register_node(node_id);
        }
        let mut nodes = self.nodes.write();
        if let Some(record) = nodes.get_mut(node_id) {
            f(&mut record.performance);
        }
    }

    // -------------------------------------------------------------------------
    // Decay
    // -------------------------------------------------------------------------

    /// Run the periodic decay pass.
    ///
    /// Nodes inactive for more than one day lose a fraction of their current
    /// score proportional to days-inactive x decay rate (capped at the whole
    /// score). Nodes below the activity threshold since the previous pass
    /// additionally take a flat penalty. Returns the number of deltas applied.
    pub fn apply_decay(&self, now: DateTime<Utc>) -> usize {
        // Plan under the read lock, apply via apply_delta so every change
        // goes through the one mutation primitive.
        struct Planned {
            node_id: String,
            inactivity: Option<(f64, f64)>, // (days_inactive, delta)
            low_activity: bool,
        }

        let planned: Vec<Planned> = {
            let nodes = self.nodes.read();
            nodes
                .iter()
                .map(|(node_id, record)| {
                    let days_inactive = (now - record.performance.last_active)
                        .num_seconds()
                        .max(0) as f64
                        / 86_400.0;

                    let inactivity = if days_inactive > 1.0 {
                        let fraction =
                            (days_inactive * self.decay_rate_pct_per_day / 100.0).min(1.0);
                        Some((days_inactive, -record.score * fraction))
                    } else {
                        None
                    };

                    Planned {
                        node_id: node_id.clone(),
                        inactivity,
                        low_activity: record.performance.signals_since_decay
                            < self.min_activity_threshold,
                    }
                })
                .collect()
        };

        let mut applied = 0;
        for plan in planned {
            if let Some((days, delta)) = plan.inactivity {
                self.apply_delta(
                    &plan.node_id,
                    delta,
                    UpdateReason::InactivityDecay,
                    vec![
                        UpdateFactor::new("days_inactive", days),
                        UpdateFactor::new("decay", delta),
                    ],
                );
                applied += 1;
            }
            if plan.low_activity {
                self.apply_delta(
                    &plan.node_id,
                    -LOW_ACTIVITY_PENALTY,
                    UpdateReason::LowActivity,
                    vec![UpdateFactor::new("low_activity", -LOW_ACTIVITY_PENALTY)],
                );
                applied += 1;
            }
        }

        // Start a fresh activity window.
        let mut nodes = self.nodes.write();
        for record in nodes.values_mut() {
            record.performance.signals_since_decay = 0;
        }

        if applied > 0 {
            info!(applied, "reputation decay pass complete");
        }
        applied
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Current score, if the node exists.
    pub fn score_of(&self, node_id: &str) -> Option<f64> {
        self.nodes.read().get(node_id).map(|r| r.score)
    }

    pub fn tier_of(&self, node_id: &str) -> Option<Tier> {
        self.score_of(node_id)
            .map(|s| Tier::for_score(s, self.max_score))
    }

    /// Ordinal trust check against the tier ladder. Unknown nodes are never
    /// trusted.
    pub fn is_trusted(&self, node_id: &str, min_tier: Tier) -> bool {
        self.tier_of(node_id).map_or(false, |t| t >= min_tier)
    }

    pub fn node(&self, node_id: &str) -> Option<NodeReputation> {
        let nodes = self.nodes.read();
        nodes.get(node_id).map(|r| NodeReputation {
            node_id: node_id.to_string(),
            score: r.score,
            tier: Tier::for_score(r.score, self.max_score),
            performance: r.performance.clone(),
            update_count: r.history.len(),
        })
    }

    /// All nodes, sorted by score descending.
    pub fn all_nodes(&self) -> Vec<NodeReputation> {
        let nodes = self.nodes.read();
        let mut out: Vec<NodeReputation> = nodes
            .iter()
            .map(|(id, r)| NodeReputation {
                node_id: id.clone(),
                score: r.score,
                tier: Tier::for_score(r.score, self.max_score),
                performance: r.performance.clone(),
                update_count: r.history.len(),
            })
            .collect();
        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        out
    }

    pub fn nodes_by_tier(&self, tier: Tier) -> Vec<String> {
        let nodes = self.nodes.read();
        let mut out: Vec<String> = nodes
            .iter()
            .filter(|(_, r)| Tier::for_score(r.score, self.max_score) == tier)
            .map(|(id, _)| id.clone())
            .collect();
        out.sort();
        out
    }

    /// The most recent `limit` audit records for a node, oldest first.
    pub fn node_history(&self, node_id: &str, limit: usize) -> Vec<ReputationUpdate> {
        let nodes = self.nodes.read();
        nodes
            .get(node_id)
            .map(|r| {
                let start = r.history.len().saturating_sub(limit);
                r.history[start..].to_vec()
            })
            .unwrap_or_default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Aggregate metrics. Pure read, no mutation.
    pub fn metrics(&self) -> ReputationMetrics {
        let nodes = self.nodes.read();
        let now = Utc::now();

        let mut scores: Vec<f64> = nodes.values().map(|r| r.score).collect();
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mean_score = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        let median_score = if scores.is_empty() {
            0.0
        } else if scores.len() % 2 == 1 {
            scores[scores.len() / 2]
        } else {
            (scores[scores.len() / 2 - 1] + scores[scores.len() / 2]) / 2.0
        };

        let mut tier_counts: BTreeMap<String, usize> = Tier::all()
            .iter()
            .map(|t| (t.to_string(), 0))
            .collect();
        for record in nodes.values() {
            let tier = Tier::for_score(record.score, self.max_score);
            *tier_counts.entry(tier.to_string()).or_insert(0) += 1;
        }

        let active_last_24h = nodes
            .values()
            .filter(|r| now - r.performance.last_active <= Duration::hours(24))
            .count();

        ReputationMetrics {
            node_count: nodes.len(),
            mean_score,
            median_score,
            tier_counts,
            active_last_24h,
        }
    }
}

impl std::fmt::Debug for ReputationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReputationStore")
            .field("node_count", &self.node_count())
            .field("initial_score", &self.initial_score)
            .field("min_score", &self.min_score)
            .field("max_score", &self.max_score)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ReputationStore {
        ReputationStore::new(&EngineConfig::default(), EventBus::new())
    }

    #[test]
    fn register_is_idempotent() {
        let store = store();
        assert!(store.register_node("node-a"));
        assert!(!store.register_node("node-a"));
        assert_eq!(store.node_count(), 1);
        assert_eq!(store.score_of("node-a"), Some(0.5));
    }

    #[test]
    fn apply_delta_clamps_to_bounds() {
        let store = store();
        store.register_node("node-a");

        store.apply_delta("node-a", 10.0, UpdateReason::SignalPerformance, vec![]);
        assert_eq!(store.score_of("node-a"), Some(1.0));

        store.apply_delta("node-a", -10.0, UpdateReason::SignalPerformance, vec![]);
        assert_eq!(store.score_of("node-a"), Some(0.0));
    }

    #[test]
    fn score_stays_in_bounds_across_arbitrary_delta_sequences() {
        let store = store();
        store.register_node("node-a");
        let deltas = [0.3, -0.7, 2.0, -5.0, 0.05, 0.95, -0.001, 7.0];
        for d in deltas {
            store.apply_delta("node-a", d, UpdateReason::NetworkContribution, vec![]);
            let score = store.score_of("node-a").unwrap();
            assert!((0.0..=1.0).contains(&score), "score {score} out of bounds");
        }
    }

    #[test]
    fn apply_delta_appends_audit_history() {
        let store = store();
        store.register_node("node-a");

        let update = store.apply_delta(
            "node-a",
            0.1,
            UpdateReason::SignalPerformance,
            vec![UpdateFactor::new("accuracy", 0.1)],
        );
        assert!((update.previous_score - 0.5).abs() < 1e-12);
        assert!((update.new_score - 0.6).abs() < 1e-12);

        let history = store.node_history("node-a", 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason, UpdateReason::SignalPerformance);
        assert_eq!(history[0].factors[0].name, "accuracy");
    }

    #[test]
    fn apply_delta_registers_unknown_node() {
        let store = store();
        store.apply_delta("ghost", 0.1, UpdateReason::ConsensusParticipation, vec![]);
        assert!(store.contains("ghost"));
        assert!((store.score_of("ghost").unwrap() - 0.6).abs() < 1e-12);
    }

    #[tokio::test]
    async fn tier_change_emits_event() {
        let events = EventBus::new();
        let store = ReputationStore::new(&EngineConfig::default(), events.clone());
        let mut rx = events.subscribe();

        store.register_node("node-a"); // 0.5 => Contributor
        let _ = rx.recv().await.unwrap(); // NodeRegistered

        store.apply_delta("node-a", 0.2, UpdateReason::SignalPerformance, vec![]);
        // First: ReputationUpdated, then TierChanged.
        let _ = rx.recv().await.unwrap();
        match rx.recv().await.unwrap() {
            EngineEvent::TierChanged {
                previous, current, ..
            } => {
                assert_eq!(previous, Tier::Contributor);
                assert_eq!(current, Tier::Trusted);
            }
            other => panic!("expected TierChanged, got {other:?}"),
        }
    }

    #[test]
    fn decay_matches_reference_scenario() {
        // score=0.8, decay_rate=2 %/day, inactive exactly 5 days => -0.08.
        let store = store();
        store.register_node("node-a");
        store.apply_delta("node-a", 0.3, UpdateReason::SignalPerformance, vec![]);
        assert!((store.score_of("node-a").unwrap() - 0.8).abs() < 1e-12);

        // Submissions keep the node above the activity threshold so only
        // the inactivity component fires.
        let five_days_ago = Utc::now() - Duration::days(5);
        store.update_performance("node-a", |p| {
            p.last_active = five_days_ago;
            p.signals_since_decay = 100;
        });

        store.apply_decay(Utc::now());
        let score = store.score_of("node-a").unwrap();
        assert!((score - 0.72).abs() < 1e-6, "expected ~0.72, got {score}");

        let history = store.node_history("node-a", 10);
        assert_eq!(
            history.last().unwrap().reason,
            UpdateReason::InactivityDecay
        );
    }

    #[test]
    fn decay_skips_recently_active_nodes() {
        let store = store();
        store.register_node("node-a");
        store.update_performance("node-a", |p| p.signals_since_decay = 100);

        store.apply_decay(Utc::now());
        assert_eq!(store.score_of("node-a"), Some(0.5));
    }

    #[test]
    fn low_activity_penalty_applies_independently() {
        let store = store();
        store.register_node("node-a");
        // Active now (no inactivity decay) but zero signals this window.
        store.apply_decay(Utc::now());

        let score = store.score_of("node-a").unwrap();
        assert!((score - 0.49).abs() < 1e-12);
        let history = store.node_history("node-a", 10);
        assert_eq!(history.last().unwrap().reason, UpdateReason::LowActivity);
    }

    #[test]
    fn decay_resets_activity_window() {
        let store = store();
        store.register_node("node-a");
        store.update_performance("node-a", |p| p.signals_since_decay = 100);

        store.apply_decay(Utc::now());
        let node = store.node("node-a").unwrap();
        assert_eq!(node.performance.signals_since_decay, 0);
    }

    #[test]
    fn all_nodes_sorted_by_score_descending() {
        let store = store();
        store.register_node("low");
        store.register_node("high");
        store.register_node("mid");
        store.apply_delta("high", 0.4, UpdateReason::SignalPerformance, vec![]);
        store.apply_delta("low", -0.4, UpdateReason::SignalPerformance, vec![]);

        let all = store.all_nodes();
        assert_eq!(all[0].node_id, "high");
        assert_eq!(all[1].node_id, "mid");
        assert_eq!(all[2].node_id, "low");
    }

    #[test]
    fn nodes_by_tier_and_trust_check() {
        let store = store();
        store.register_node("node-a"); // 0.5 => Contributor
        store.register_node("node-b");
        store.apply_delta("node-b", 0.45, UpdateReason::SignalPerformance, vec![]); // 0.95 => Master

        assert_eq!(store.nodes_by_tier(Tier::Contributor), vec!["node-a"]);
        assert_eq!(store.nodes_by_tier(Tier::Master), vec!["node-b"]);

        assert!(store.is_trusted("node-b", Tier::Trusted));
        assert!(!store.is_trusted("node-a", Tier::Trusted));
        assert!(!store.is_trusted("missing", Tier::Untrusted));
    }

    #[test]
    fn metrics_aggregates() {
        let store = store();
        store.register_node("node-a");
        store.register_node("node-b");
        store.register_node("node-c");
        store.apply_delta("node-a", 0.3, UpdateReason::SignalPerformance, vec![]); // 0.8
        store.apply_delta("node-c", -0.3, UpdateReason::SignalPerformance, vec![]); // 0.2

        let m = store.metrics();
        assert_eq!(m.node_count, 3);
        assert!((m.mean_score - 0.5).abs() < 1e-12);
        assert!((m.median_score - 0.5).abs() < 1e-12);
        assert_eq!(m.active_last_24h, 3);
        assert_eq!(m.tier_counts["expert"], 1);
        assert_eq!(m.tier_counts["contributor"], 1);
        assert_eq!(m.tier_counts["novice"], 1);
    }

    #[test]
    fn metrics_on_empty_store() {
        let m = store().metrics();
        assert_eq!(m.node_count, 0);
        assert_eq!(m.mean_score, 0.0);
        assert_eq!(m.median_score, 0.0);
    }
}
