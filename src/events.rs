// =============================================================================
// Engine Events — outbound notifications for downstream consumers
// =============================================================================
//
// The only channel through which execution, dashboards, and compliance
// archiving observe the engine. Realised as a tokio broadcast channel:
// publishers never block, and every publish happens while the relevant
// subsystem lock is held, so delivery order per key matches mutation order.
// A lagged subscriber drops its oldest undelivered events; that is the
// subscriber's contract, not the engine's.
// =============================================================================

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::consensus::ConsensusResult;
use crate::ledger::TradeSignal;
use crate::reputation::{ReputationUpdate, Tier};

/// Buffered events per subscriber before lag kicks in.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Everything a collaborator can observe.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    NodeRegistered {
        node_id: String,
    },
    SignalSubmitted {
        signal: TradeSignal,
        pending: usize,
    },
    ConsensusAchieved(ConsensusResult),
    ReputationUpdated(ReputationUpdate),
    TierChanged {
        node_id: String,
        previous: Tier,
        current: Tier,
        score: f64,
    },
}

/// Cloneable publish handle. Subscribers attach via `subscribe()`.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Fire-and-forget publish. A send error only means there are currently
    /// no subscribers, which is fine.
    pub fn publish(&self, event: EngineEvent) {
        trace!(?event, "event published");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
