// =============================================================================
// Trust Tiers — discrete classification derived from score
// =============================================================================
//
// Tiers are never stored; they are a pure function of (score, max_score).
// The ladder boundaries sit at cumulative fractions of max_score:
//
//   Untrusted    [0.00, 0.20)
//   Novice       [0.20, 0.40)
//   Contributor  [0.40, 0.60)
//   Trusted      [0.60, 0.80)
//   Expert       [0.80, 0.95)
//   Master       [0.95, 1.00]
// =============================================================================

use serde::{Deserialize, Serialize};

/// Discrete trust classification. Ordinal: `Ord` follows the ladder, so
/// `tier >= Tier::Trusted` is the "is this node trusted enough" check.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Untrusted,
    Novice,
    Contributor,
    Trusted,
    Expert,
    Master,
}

impl Tier {
    /// Classify a score against the ladder for the given `max_score`.
    pub fn for_score(score: f64, max_score: f64) -> Self {
        let fraction = if max_score > 0.0 {
            (score / max_score).clamp(0.0, 1.0)
        } else {
            0.0
        };

        if fraction < 0.20 {
            Self::Untrusted
        } else if fraction < 0.40 {
            Self::Novice
        } else if fraction < 0.60 {
            Self::Contributor
        } else if fraction < 0.80 {
            Self::Trusted
        } else if fraction < 0.95 {
            Self::Expert
        } else {
            Self::Master
        }
    }

    pub fn all() -> [Tier; 6] {
        [
            Self::Untrusted,
            Self::Novice,
            Self::Contributor,
            Self::Trusted,
            Self::Expert,
            Self::Master,
        ]
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "untrusted" => Ok(Self::Untrusted),
            "novice" => Ok(Self::Novice),
            "contributor" => Ok(Self::Contributor),
            "trusted" => Ok(Self::Trusted),
            "expert" => Ok(Self::Expert),
            "master" => Ok(Self::Master),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Untrusted => write!(f, "untrusted"),
            Self::Novice => write!(f, "novice"),
            Self::Contributor => write!(f, "contributor"),
            Self::Trusted => write!(f, "trusted"),
            Self::Expert => write!(f, "expert"),
            Self::Master => write!(f, "master"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_boundaries() {
        assert_eq!(Tier::for_score(0.0, 1.0), Tier::Untrusted);
        assert_eq!(Tier::for_score(0.19, 1.0), Tier::Untrusted);
        assert_eq!(Tier::for_score(0.20, 1.0), Tier::Novice);
        assert_eq!(Tier::for_score(0.40, 1.0), Tier::Contributor);
        assert_eq!(Tier::for_score(0.60, 1.0), Tier::Trusted);
        assert_eq!(Tier::for_score(0.80, 1.0), Tier::Expert);
        assert_eq!(Tier::for_score(0.95, 1.0), Tier::Master);
        assert_eq!(Tier::for_score(1.0, 1.0), Tier::Master);
    }

    #[test]
    fn ladder_scales_with_max_score() {
        assert_eq!(Tier::for_score(50.0, 100.0), Tier::Contributor);
        assert_eq!(Tier::for_score(96.0, 100.0), Tier::Master);
        assert_eq!(Tier::for_score(10.0, 100.0), Tier::Untrusted);
    }

    #[test]
    fn tier_is_monotone_in_score() {
        let mut last = Tier::Untrusted;
        let mut score = 0.0;
        while score <= 1.0 {
            let tier = Tier::for_score(score, 1.0);
            assert!(tier >= last, "tier regressed at score {score}");
            last = tier;
            score += 0.001;
        }
    }

    #[test]
    fn ordinal_comparison() {
        assert!(Tier::Master > Tier::Expert);
        assert!(Tier::Trusted >= Tier::Trusted);
        assert!(Tier::Untrusted < Tier::Novice);
    }

    #[test]
    fn degenerate_max_score_is_untrusted() {
        assert_eq!(Tier::for_score(0.5, 0.0), Tier::Untrusted);
    }

    #[test]
    fn parse_roundtrips_display() {
        for tier in Tier::all() {
            assert_eq!(tier.to_string().parse::<Tier>().unwrap(), tier);
        }
        assert!("archmage".parse::<Tier>().is_err());
    }
}
