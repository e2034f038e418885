// =============================================================================
// Engine Configuration — Hot-reloadable consensus parameters with atomic save
// =============================================================================
//
// Every tunable parameter of the consensus and reputation subsystems lives
// here so a deployment can be re-tuned without a rebuild.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry serde defaults so that adding new fields never
// breaks loading an older config file.
//
// `validate()` is called once at startup; an invalid threshold or inverted
// score bound is fatal there and nowhere else.
// =============================================================================

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_min_nodes() -> usize {
    3
}

fn default_consensus_threshold() -> f64 {
    0.66
}

fn default_byzantine_tolerance() -> usize {
    1
}

fn default_signal_validity_window_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_initial_score() -> f64 {
    0.5
}

fn default_min_score() -> f64 {
    0.0
}

fn default_max_score() -> f64 {
    1.0
}

fn default_decay_rate_pct_per_day() -> f64 {
    2.0
}

fn default_min_activity_threshold() -> u64 {
    5
}

fn default_sweep_interval_secs() -> u64 {
    1
}

fn default_decay_interval_secs() -> u64 {
    86_400
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the Meridian consensus engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Consensus -----------------------------------------------------------

    /// Minimum number of distinct, unexpired signals before a bucket is
    /// eligible for evaluation.
    #[serde(default = "default_min_nodes")]
    pub min_nodes: usize,

    /// Fraction of total voting weight the majority action must hold for
    /// consensus to be declared (0–1).
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,

    /// Number of simultaneously faulty nodes the deployment wants to be able
    /// to absorb under the 3f+1 rule. Advisory only.
    #[serde(default = "default_byzantine_tolerance")]
    pub byzantine_tolerance: usize,

    /// Signals older than this (seconds) are never counted toward consensus.
    #[serde(default = "default_signal_validity_window_secs")]
    pub signal_validity_window_secs: u64,

    /// When false, every signal gets weight 1 regardless of node reputation.
    #[serde(default = "default_true")]
    pub use_reputation: bool,

    /// When true, unsigned signals are rejected at submission.
    #[serde(default)]
    pub require_signatures: bool,

    // --- Reputation ----------------------------------------------------------

    /// Score assigned to a node on registration.
    #[serde(default = "default_initial_score")]
    pub initial_score: f64,

    /// Lower clamp for all scores.
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    /// Upper clamp for all scores. Tier boundaries are fractions of this.
    #[serde(default = "default_max_score")]
    pub max_score: f64,

    /// Percentage of current score lost per day of inactivity.
    #[serde(default = "default_decay_rate_pct_per_day")]
    pub decay_rate_pct_per_day: f64,

    /// Nodes submitting fewer signals than this between decay passes take a
    /// flat low-activity penalty.
    #[serde(default = "default_min_activity_threshold")]
    pub min_activity_threshold: u64,

    // --- Scheduler -----------------------------------------------------------

    /// Period of the safety-net sweep (expiry + re-evaluation), in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Period of the reputation decay pass, in seconds.
    #[serde(default = "default_decay_interval_secs")]
    pub decay_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_nodes: default_min_nodes(),
            consensus_threshold: default_consensus_threshold(),
            byzantine_tolerance: default_byzantine_tolerance(),
            signal_validity_window_secs: default_signal_validity_window_secs(),
            use_reputation: true,
            require_signatures: false,
            initial_score: default_initial_score(),
            min_score: default_min_score(),
            max_score: default_max_score(),
            decay_rate_pct_per_day: default_decay_rate_pct_per_day(),
            min_activity_threshold: default_min_activity_threshold(),
            sweep_interval_secs: default_sweep_interval_secs(),
            decay_interval_secs: default_decay_interval_secs(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            min_nodes = config.min_nodes,
            consensus_threshold = config.consensus_threshold,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Reject configurations the engine cannot run with. Called once at
    /// startup; a failure here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.min_nodes == 0 {
            bail!("min_nodes must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.consensus_threshold) || self.consensus_threshold == 0.0 {
            bail!(
                "consensus_threshold must be in (0, 1], got {}",
                self.consensus_threshold
            );
        }
        if self.min_score >= self.max_score {
            bail!(
                "score bounds inverted: min_score {} >= max_score {}",
                self.min_score,
                self.max_score
            );
        }
        if !(self.min_score..=self.max_score).contains(&self.initial_score) {
            bail!(
                "initial_score {} outside [{}, {}]",
                self.initial_score,
                self.min_score,
                self.max_score
            );
        }
        if self.decay_rate_pct_per_day < 0.0 {
            bail!("decay_rate_pct_per_day must be non-negative");
        }
        if self.sweep_interval_secs == 0 || self.decay_interval_secs == 0 {
            bail!("sweep_interval_secs and decay_interval_secs must be non-zero");
        }
        Ok(())
    }

    /// Validity window as a chrono duration.
    pub fn validity_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.signal_validity_window_secs as i64)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.min_nodes, 3);
        assert!((cfg.consensus_threshold - 0.66).abs() < f64::EPSILON);
        assert_eq!(cfg.byzantine_tolerance, 1);
        assert_eq!(cfg.signal_validity_window_secs, 300);
        assert!(cfg.use_reputation);
        assert!(!cfg.require_signatures);
        assert!((cfg.initial_score - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.sweep_interval_secs, 1);
        assert_eq!(cfg.decay_interval_secs, 86_400);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.min_nodes, 3);
        assert!(cfg.use_reputation);
        assert_eq!(cfg.min_activity_threshold, 5);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "min_nodes": 5, "consensus_threshold": 0.75 }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.min_nodes, 5);
        assert!((cfg.consensus_threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(cfg.byzantine_tolerance, 1);
        assert!((cfg.max_score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.min_nodes, cfg2.min_nodes);
        assert_eq!(cfg.sweep_interval_secs, cfg2.sweep_interval_secs);
        assert!((cfg.consensus_threshold - cfg2.consensus_threshold).abs() < f64::EPSILON);
    }

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_threshold() {
        let mut cfg = EngineConfig::default();
        cfg.consensus_threshold = 1.5;
        assert!(cfg.validate().is_err());
        cfg.consensus_threshold = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_score_bounds() {
        let mut cfg = EngineConfig::default();
        cfg.min_score = 2.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_min_nodes() {
        let mut cfg = EngineConfig::default();
        cfg.min_nodes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_initial_score_outside_bounds() {
        let mut cfg = EngineConfig::default();
        cfg.initial_score = 1.5;
        assert!(cfg.validate().is_err());
    }
}
