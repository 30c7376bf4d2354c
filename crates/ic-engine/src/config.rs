// config.rs — Engine configuration.
//
// EngineConfig carries the engine's tunables: the materialization
// horizon, the proof grace period, and the automated verification
// thresholds. Serde defaults let a TOML config file set
// only what it changes.

use serde::{Deserialize, Serialize};

/// Configuration for the scheduling/settlement engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many days ahead the materializer creates obligations, so
    /// users see what is coming before it is due.
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u64,

    /// How many days past the obligation date a proof submission is
    /// still accepted.
    #[serde(default = "default_grace_days")]
    pub grace_period_days: i64,

    /// Automated score at or above which proof is auto-approved.
    #[serde(default = "default_approve_threshold")]
    pub approve_threshold: f64,

    /// Automated score at or below which proof is auto-rejected.
    #[serde(default = "default_reject_threshold")]
    pub reject_threshold: f64,

    /// Attempts for a whole materialization pass before deferring to
    /// the next schedule tick.
    #[serde(default = "default_pass_attempts")]
    pub materializer_pass_attempts: u32,
}

fn default_horizon_days() -> u64 {
    7
}

fn default_grace_days() -> i64 {
    1
}

fn default_approve_threshold() -> f64 {
    0.8
}

fn default_reject_threshold() -> f64 {
    0.3
}

fn default_pass_attempts() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
            grace_period_days: default_grace_days(),
            approve_threshold: default_approve_threshold(),
            reject_threshold: default_reject_threshold(),
            materializer_pass_attempts: default_pass_attempts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_the_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.horizon_days, 7);
        assert_eq!(config.grace_period_days, 1);
        assert_eq!(config.approve_threshold, 0.8);
        assert_eq!(config.reject_threshold, 0.3);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: EngineConfig = toml::from_str("horizon_days = 14").unwrap();
        assert_eq!(config.horizon_days, 14);
        assert_eq!(config.grace_period_days, 1);
    }
}
