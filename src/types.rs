// =============================================================================
// Shared types used across the Meridian consensus engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// The closed set of actions a node can vote for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// Key identifying one consensus bucket: every signal for the same asset and
/// time horizon competes in the same round.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub symbol: String,
    pub timeframe: String,
}

impl BucketKey {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
        }
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.symbol, self.timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&SignalAction::Buy).unwrap(), "\"buy\"");
        assert_eq!(serde_json::to_string(&SignalAction::Sell).unwrap(), "\"sell\"");
        assert_eq!(serde_json::to_string(&SignalAction::Hold).unwrap(), "\"hold\"");
    }

    #[test]
    fn bucket_key_display() {
        let key = BucketKey::new("BTC/USD", "15m");
        assert_eq!(key.to_string(), "BTC/USD:15m");
    }
}
