//! Tier configuration for named rate limiters.
//!
//! The operation that rotates the upstream API key is expected to call
//! [`DistributedRateLimiter::configure`](crate::ratelimit::DistributedRateLimiter::configure)
//! with the tiers belonging to the new key. This module holds those tier
//! lists, typically loaded from a YAML file keyed by limiter name.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::ratelimit::RateLimit;

/// Errors raised while loading or validating limiter configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration was not valid YAML of the expected shape.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// The configuration parsed but violated a limit invariant.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tier lists for every named limiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Map of limiter name to its tier list.
    #[serde(default)]
    pub limiters: HashMap<String, LimiterSpec>,
}

/// The tier list for a single named limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSpec {
    /// Tiers enforced together; a request must pass all of them.
    pub tiers: Vec<TierSpec>,
}

/// One tier: `max_tokens` events per `interval_seconds`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierSpec {
    /// Maximum events allowed within the interval.
    pub max_tokens: u32,
    /// Length of the refill window in seconds.
    pub interval_seconds: u32,
}

impl LimiterSpec {
    /// The stock developer-key quota of the upstream API: 5 calls per
    /// 10 seconds and 250 calls per 10 minutes.
    pub fn dev_key_default() -> Self {
        Self {
            tiers: vec![
                TierSpec {
                    max_tokens: 5,
                    interval_seconds: 10,
                },
                TierSpec {
                    max_tokens: 250,
                    interval_seconds: 600,
                },
            ],
        }
    }

    /// Convert to the limiter's tier value type.
    pub fn to_tiers(&self) -> Vec<RateLimit> {
        self.tiers
            .iter()
            .map(|tier| RateLimit::new(tier.max_tokens, tier.interval_seconds))
            .collect()
    }
}

impl LimitsConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: LimitsConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// The tier list configured for `name`, if any.
    pub fn tiers_for(&self, name: &str) -> Option<Vec<RateLimit>> {
        self.limiters.get(name).map(LimiterSpec::to_tiers)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, spec) in &self.limiters {
            if spec.tiers.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "limiter '{}' has no tiers",
                    name
                )));
            }
            for tier in &spec.tiers {
                if tier.max_tokens == 0 || tier.interval_seconds == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "limiter '{}' has a tier with a zero max_tokens or interval_seconds",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_config() {
        let yaml = r#"
limiters:
  riot-api:
    tiers:
      - max_tokens: 5
        interval_seconds: 10
      - max_tokens: 250
        interval_seconds: 600
"#;
        let config = LimitsConfig::from_yaml(yaml).unwrap();

        let tiers = config.tiers_for("riot-api").unwrap();
        assert_eq!(tiers, vec![RateLimit::new(5, 10), RateLimit::new(250, 600)]);
    }

    #[test]
    fn test_unknown_limiter_has_no_tiers() {
        let config = LimitsConfig::new();
        assert!(config.tiers_for("riot-api").is_none());
    }

    #[test]
    fn test_zero_valued_tier_is_rejected() {
        let yaml = r#"
limiters:
  riot-api:
    tiers:
      - max_tokens: 0
        interval_seconds: 10
"#;
        let err = LimitsConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_empty_tier_list_is_rejected() {
        let yaml = r#"
limiters:
  riot-api:
    tiers: []
"#;
        let err = LimitsConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_yaml_is_a_parse_error() {
        let err = LimitsConfig::from_yaml("limiters: [not, a, map]").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_dev_key_default_tiers() {
        let tiers = LimiterSpec::dev_key_default().to_tiers();
        assert_eq!(tiers, vec![RateLimit::new(5, 10), RateLimit::new(250, 600)]);
    }
}
