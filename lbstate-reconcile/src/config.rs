//! Reconciliation configuration
//!
//! Poll and retry timings are plain values handed to the engine, so the same
//! waiter and retry loop serve every resource kind. Durations are written in
//! seconds when loaded from JSON:
//!
//! ```json
//! {
//!   "wait": {"timeout_secs": 600, "delay_secs": 0, "min_interval_secs": 1, "max_interval_secs": 10},
//!   "retry": {"initial_delay_secs": 1, "max_delay_secs": 10, "backoff_multiplier": 2.0, "jitter": true},
//!   "protocol": "auto"
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// First poll interval before doubling kicks in
const INITIAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid configuration: {0}")]
    Parse(String),
}

/// Timing of a status wait
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Total budget for the wait (default: 10 minutes)
    #[serde(rename = "timeout_secs", with = "secs")]
    pub timeout: Duration,

    /// Pause before the first poll (default: none)
    #[serde(rename = "delay_secs", with = "secs")]
    pub delay: Duration,

    /// Lower bound between polls (default: 1 second)
    #[serde(rename = "min_interval_secs", with = "secs")]
    pub min_interval: Duration,

    /// Upper bound between polls (default: 10 seconds)
    #[serde(rename = "max_interval_secs", with = "secs")]
    pub max_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            delay: Duration::ZERO,
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
        }
    }
}

impl WaitConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pause after the `polls`-th poll
    ///
    /// Starts at 100ms and doubles per poll, capped at `max_interval` and
    /// never shorter than `min_interval`.
    pub fn interval_after(&self, polls: u32) -> Duration {
        let doubling = 2u32.saturating_pow(polls.saturating_sub(1).min(16));
        INITIAL_POLL_INTERVAL
            .saturating_mul(doubling)
            .min(self.max_interval)
            .max(self.min_interval)
    }
}

/// Backoff for retried mutations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay after the first failed attempt
    #[serde(rename = "initial_delay_secs", with = "secs")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    #[serde(rename = "max_delay_secs", with = "secs")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Scale each delay by a random factor in 0.5x..1.5x
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay following `delay`, capped at `max_delay`
    ///
    /// A product that is not a valid duration falls back to `max_delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let secs =
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Parse(format!(
                "retry.backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Which status reporting protocol refresh functions use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusProtocol {
    /// Decide per resource from whether the backend reported its status
    #[default]
    Auto,
    /// Always read `provisioning_status` from each object
    Direct,
    /// Always read the load balancer status tree
    Tree,
}

/// Configuration of the reconciliation engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub wait: WaitConfig,
    pub retry: RetryConfig,
    pub protocol: StatusProtocol,
}

impl ReconcileConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that deserialize fine but cannot drive the engine
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Io(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }
}
