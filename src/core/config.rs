use crate::core::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a candidate leader does when the capacity limiter is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Fail immediately with `CapacityExceeded`
    FailFast,
    /// Wait for a slot, bounded by the major timeout
    Queue,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        CapacityPolicy::Queue
    }
}

/// Immutable snapshot of the tunable limits of one cooperation instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooperationConfig {
    /// When false the factory hands out a pass-through instance
    pub enabled: bool,
    /// Maximum concurrent leader executions for a single key
    pub threads_per_key: usize,
    /// Maximum concurrent leader executions across all keys
    pub total_threads: usize,
    /// How long a follower waits for the leader, and a queued leader for capacity.
    /// `Duration::MAX` waits indefinitely.
    #[serde(rename = "major_timeout_ms", with = "duration_ms")]
    pub major_timeout: Duration,
    /// Check-in interval of waiting followers
    #[serde(rename = "minor_timeout_ms", with = "duration_ms")]
    pub minor_timeout: Duration,
    /// Behaviour when admission is denied
    pub capacity_policy: CapacityPolicy,
    /// Optional ceiling on followers waiting under one key
    pub max_waiters_per_key: Option<usize>,
}

impl Default for CooperationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threads_per_key: 1,
            total_threads: 100,
            major_timeout: Duration::from_secs(60),
            minor_timeout: Duration::from_secs(5),
            capacity_policy: CapacityPolicy::Queue,
            max_waiters_per_key: None,
        }
    }
}

impl CooperationConfig {
    /// Validate the configuration. A disabled config is always valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.threads_per_key == 0 {
            return Err(ConfigError::field(
                "threads_per_key must be greater than 0",
                "threads_per_key",
            ));
        }
        if self.total_threads < self.threads_per_key {
            return Err(ConfigError::field(
                "total_threads cannot be less than threads_per_key",
                "total_threads",
            ));
        }
        if self.total_threads > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(ConfigError::field(
                "total_threads exceeds the maximum number of permits",
                "total_threads",
            ));
        }
        if self.major_timeout.is_zero() {
            return Err(ConfigError::field(
                "major_timeout must be greater than 0",
                "major_timeout",
            ));
        }
        if self.minor_timeout.is_zero() {
            return Err(ConfigError::field(
                "minor_timeout must be greater than 0",
                "minor_timeout",
            ));
        }
        if self.minor_timeout > self.major_timeout {
            return Err(ConfigError::field(
                "minor_timeout cannot exceed major_timeout",
                "minor_timeout",
            ));
        }
        if self.max_waiters_per_key == Some(0) {
            return Err(ConfigError::field(
                "max_waiters_per_key must be greater than 0 when set",
                "max_waiters_per_key",
            ));
        }
        Ok(())
    }

    /// A configuration that turns cooperation off entirely
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Short timeouts and a small global budget, for development and tests
    pub fn development() -> Self {
        Self {
            total_threads: 8,
            major_timeout: Duration::from_secs(5),
            minor_timeout: Duration::from_millis(250),
            ..Default::default()
        }
    }

    /// Budget for busy proxies fronting a slow upstream
    pub fn high_throughput() -> Self {
        Self {
            total_threads: 1_000,
            major_timeout: Duration::from_secs(300),
            minor_timeout: Duration::from_secs(30),
            capacity_policy: CapacityPolicy::FailFast,
            ..Default::default()
        }
    }

    /// Load and validate a configuration from YAML
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = CooperationConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.enabled);
        assert_eq!(config.threads_per_key, 1);
        assert_eq!(config.capacity_policy, CapacityPolicy::Queue);
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(CooperationConfig::development().validate().is_ok());
        assert!(CooperationConfig::high_throughput().validate().is_ok());
        assert!(CooperationConfig::disabled().validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = CooperationConfig::default();

        config.threads_per_key = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("threads_per_key"));
        config.threads_per_key = 4;

        config.total_threads = 2;
        assert!(config.validate().is_err());
        config.total_threads = 4;

        config.major_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
        config.major_timeout = Duration::from_secs(1);

        config.minor_timeout = Duration::from_secs(2);
        assert!(config.validate().is_err());
        config.minor_timeout = Duration::from_millis(100);

        config.max_waiters_per_key = Some(0);
        assert!(config.validate().is_err());
        config.max_waiters_per_key = Some(10);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unbounded_major_timeout() {
        let config = CooperationConfig {
            major_timeout: Duration::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(&format!("\"major_timeout_ms\":{}", u64::MAX)));

        let oversized = CooperationConfig {
            total_threads: usize::MAX,
            ..Default::default()
        };
        let err = oversized.validate().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("total_threads"));
    }

    #[test]
    fn test_disabled_skips_limits() {
        let config = CooperationConfig {
            enabled: false,
            threads_per_key: 0,
            total_threads: 0,
            major_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
enabled: true
threads_per_key: 1
total_threads: 4
major_timeout_ms: 2000
minor_timeout_ms: 100
capacity_policy: fail_fast
"#;
        let config = CooperationConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.total_threads, 4);
        assert_eq!(config.major_timeout, Duration::from_secs(2));
        assert_eq!(config.minor_timeout, Duration::from_millis(100));
        assert_eq!(config.capacity_policy, CapacityPolicy::FailFast);
        assert_eq!(config.max_waiters_per_key, None);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let json = r#"{"total_threads": 0}"#;
        assert!(CooperationConfig::from_json_str(json).is_err());

        assert!(CooperationConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_json_round_trip_uses_millis() {
        let config = CooperationConfig::development();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["major_timeout_ms"], 5000);
        assert_eq!(value["capacity_policy"], "queue");
    }
}
