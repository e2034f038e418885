// =============================================================================
// Consensus subsystem
// =============================================================================

pub mod evaluator;

pub use evaluator::{ConsensusEvaluator, ConsensusMetrics, ConsensusResult};
