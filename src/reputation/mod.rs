// =============================================================================
// Reputation subsystem
// =============================================================================

pub mod feedback;
pub mod store;
pub mod tier;

pub use feedback::FeedbackApplier;
pub use store::{
    NodeReputation, PerformanceCounters, ReputationMetrics, ReputationStore, ReputationUpdate,
    UpdateFactor, UpdateReason,
};
pub use tier::Tier;
