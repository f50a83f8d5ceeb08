//! Configuration types.

use crate::error::ConfigError;

/// Scoring core configuration.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Labeled records required before automatic retraining fires.
    pub retraining_threshold: u64,
    /// Absolute AUC gain a challenger must show over the champion.
    pub improvement_threshold: f64,
    /// Score at or above which a lead is high risk.
    pub high_threshold: f64,
    /// Score at or above which a lead is medium risk (below: low).
    pub medium_threshold: f64,
    /// Train split ratio for held-out evaluation (rest is the test set).
    pub train_split: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            retraining_threshold: 50,
            improvement_threshold: 0.02,
            high_threshold: 0.7,
            medium_threshold: 0.4,
            train_split: 0.8,
        }
    }
}

impl ScoringConfig {
    /// Build a config from `LEAD_SCORE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = read_env("LEAD_SCORE_RETRAINING_THRESHOLD")? {
            config.retraining_threshold = v;
        }
        if let Some(v) = read_env("LEAD_SCORE_IMPROVEMENT_THRESHOLD")? {
            config.improvement_threshold = v;
        }
        if let Some(v) = read_env("LEAD_SCORE_HIGH_THRESHOLD")? {
            config.high_threshold = v;
        }
        if let Some(v) = read_env("LEAD_SCORE_MEDIUM_THRESHOLD")? {
            config.medium_threshold = v;
        }
        if let Some(v) = read_env("LEAD_SCORE_TRAIN_SPLIT")? {
            config.train_split = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retraining_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retraining_threshold".into(),
                message: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.improvement_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "improvement_threshold".into(),
                message: "must be within [0, 1]".into(),
            });
        }
        if !(0.0..1.0).contains(&self.train_split) || self.train_split == 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "train_split".into(),
                message: "must be within (0, 1)".into(),
            });
        }
        if self.medium_threshold > self.high_threshold {
            return Err(ConfigError::InvalidValue {
                key: "medium_threshold".into(),
                message: "must not exceed high_threshold".into(),
            });
        }
        Ok(())
    }
}

fn read_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.into(),
                message: format!("cannot parse {raw:?}"),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ScoringConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retraining_threshold, 50);
        assert!((config.improvement_threshold - 0.02).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_zero_threshold() {
        let config = ScoringConfig {
            retraining_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_risk_thresholds() {
        let config = ScoringConfig {
            high_threshold: 0.3,
            medium_threshold: 0.6,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_degenerate_split() {
        let config = ScoringConfig {
            train_split: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
