//! Fetch configuration, defaults and backoff calculation

use crate::fetcher::retry_formatter::RetryErrorType;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Requests per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Session-wide ceiling on in-flight requests.
pub const DEFAULT_MAX_CONCURRENCY: usize = 100;

/// Attempts per request, including the first one.
pub const DEFAULT_RETRIES: u32 = 3;

/// Per-attempt network timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// One backoff time unit; attempt `n` waits `2^n` units.
pub const DEFAULT_BACKOFF_UNIT_MS: u64 = 1000;

/// Cap on a single backoff sleep.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// A batch whose failure rate exceeds this counts as bad.
pub const DEFAULT_FAILURE_RATE_THRESHOLD: f64 = 0.5;

/// Consecutive bad batches that open the circuit.
pub const DEFAULT_CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

/// Initial open-circuit cool-down.
pub const DEFAULT_COOLDOWN_SECS: u64 = 30;

/// Growth factor applied to the cool-down after a failed trial batch.
pub const DEFAULT_COOLDOWN_MULTIPLIER: f64 = 2.0;

/// Cap on the cool-down.
pub const MAX_COOLDOWN_SECS: u64 = 600;

/// Size of the single half-open trial batch.
pub const DEFAULT_TRIAL_BATCH_SIZE: usize = 10;

/// Time in-flight requests get to finish after cancellation.
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 5000;

/// Throttle admissions per window.
pub const DEFAULT_THROTTLE_MAX_RATE: usize = 50;

/// Throttle window length.
pub const DEFAULT_THROTTLE_WINDOW_MS: u64 = 1000;

/// Calculate exponential backoff delay: `unit * 2^attempt`, capped at `max`.
pub fn calculate_backoff(unit: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    unit.saturating_mul(factor).min(max)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file: {0}")]
    Io(String),

    /// Config file is not valid TOML for [`FetchConfig`]
    #[error("failed to parse config file: {0}")]
    Parse(String),

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which 4xx responses are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientErrorPolicy {
    /// Retry every client error like any other failure
    #[default]
    Always,
    /// Retry only 429 responses
    RateLimitOnly,
    /// Never retry client errors
    Never,
}

impl ClientErrorPolicy {
    /// Whether a failed attempt of `error_type` may be retried under this policy.
    pub fn allows_retry(&self, error_type: RetryErrorType) -> bool {
        match error_type {
            RetryErrorType::RateLimit => !matches!(self, Self::Never),
            RetryErrorType::AuthFailed(_) | RetryErrorType::ClientError(_) => {
                matches!(self, Self::Always)
            }
            _ => true,
        }
    }
}

/// Complete engine configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Requests per batch
    pub batch_size: usize,
    /// Total request budget
    pub max_requests: u64,
    /// Session-wide in-flight ceiling
    pub max_concurrency: usize,
    /// Attempts per request, including the first
    #[serde(alias = "max_attempts")]
    pub retries: u32,
    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,
    /// Backoff time unit in milliseconds
    pub backoff_unit_ms: u64,
    /// Cap on a single backoff sleep in milliseconds
    pub max_backoff_ms: u64,
    /// Batch failure rate above which a batch counts as bad
    pub failure_rate_threshold: f64,
    /// Consecutive bad batches that open the circuit
    pub consecutive_failure_limit: u32,
    /// Initial cool-down in seconds
    pub cooldown_secs: u64,
    /// Cool-down growth after a failed trial
    pub cooldown_multiplier: f64,
    /// Cool-down cap in seconds
    pub max_cooldown_secs: u64,
    /// Requests in the half-open trial batch
    pub trial_batch_size: usize,
    /// 4xx retry policy
    pub client_error_policy: ClientErrorPolicy,
    /// Terminate the run on 401/403
    pub terminate_on_unauthorized: bool,
    /// Grace period for in-flight requests after cancellation, in milliseconds
    pub cancel_grace_ms: u64,
    /// Throttle admissions per window
    pub throttle_max_rate: usize,
    /// Throttle window in milliseconds
    pub throttle_window_ms: u64,
    /// Pacing sleep after each successful response, in milliseconds
    pub throttle_delay_ms: u64,
    /// Optional proxy URL for all requests
    pub proxy: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_requests: u64::MAX,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retries: DEFAULT_RETRIES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            backoff_unit_ms: DEFAULT_BACKOFF_UNIT_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
            failure_rate_threshold: DEFAULT_FAILURE_RATE_THRESHOLD,
            consecutive_failure_limit: DEFAULT_CONSECUTIVE_FAILURE_LIMIT,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            cooldown_multiplier: DEFAULT_COOLDOWN_MULTIPLIER,
            max_cooldown_secs: MAX_COOLDOWN_SECS,
            trial_batch_size: DEFAULT_TRIAL_BATCH_SIZE,
            client_error_policy: ClientErrorPolicy::default(),
            terminate_on_unauthorized: true,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            throttle_max_rate: DEFAULT_THROTTLE_MAX_RATE,
            throttle_window_ms: DEFAULT_THROTTLE_WINDOW_MS,
            throttle_delay_ms: 0,
            proxy: None,
        }
    }
}

impl FetchConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "Loaded fetch configuration");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".into()));
        }
        if self.retries == 0 {
            return Err(ConfigError::Invalid("retries must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.failure_rate_threshold) {
            return Err(ConfigError::Invalid(format!(
                "failure_rate_threshold {} must be within [0, 1]",
                self.failure_rate_threshold
            )));
        }
        if self.consecutive_failure_limit == 0 {
            return Err(ConfigError::Invalid(
                "consecutive_failure_limit must be at least 1".into(),
            ));
        }
        if self.trial_batch_size == 0 {
            return Err(ConfigError::Invalid("trial_batch_size must be at least 1".into()));
        }
        if !self.cooldown_multiplier.is_finite() || self.cooldown_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "cooldown_multiplier {} must be finite and >= 1.0",
                self.cooldown_multiplier
            )));
        }
        if self.throttle_max_rate == 0 {
            return Err(ConfigError::Invalid("throttle_max_rate must be at least 1".into()));
        }
        Ok(())
    }

    /// Per-attempt timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy derived from this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retries.max(1),
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            timeout: self.timeout(),
            client_errors: self.client_error_policy,
            cancel_grace: Duration::from_millis(self.cancel_grace_ms),
        }
    }

    /// Circuit breaker settings derived from this configuration
    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_rate_threshold: self.failure_rate_threshold,
            consecutive_failure_limit: self.consecutive_failure_limit.max(1),
            cooldown: Duration::from_secs(self.cooldown_secs),
            cooldown_multiplier: self.cooldown_multiplier,
            max_cooldown: Duration::from_secs(self.max_cooldown_secs),
            trial_batch_size: self.trial_batch_size.max(1),
            terminate_on_unauthorized: self.terminate_on_unauthorized,
        }
    }
}

/// Per-request attempt loop settings
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per request, including the first
    pub max_attempts: u32,
    /// Backoff time unit
    pub backoff_unit: Duration,
    /// Cap on a single backoff sleep
    pub max_backoff: Duration,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// 4xx retry policy
    pub client_errors: ClientErrorPolicy,
    /// Grace period for in-flight calls after cancellation
    pub cancel_grace: Duration,
}

impl RetryPolicy {
    /// Sleep before the attempt following failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(self.backoff_unit, self.max_backoff, attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        FetchConfig::default().retry_policy()
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Batch failure rate above which a batch counts as bad
    pub failure_rate_threshold: f64,
    /// Consecutive bad batches that open the circuit
    pub consecutive_failure_limit: u32,
    /// Initial cool-down
    pub cooldown: Duration,
    /// Cool-down growth after a failed trial
    pub cooldown_multiplier: f64,
    /// Cool-down cap
    pub max_cooldown: Duration,
    /// Requests in the half-open trial batch
    pub trial_batch_size: usize,
    /// Terminate on 401/403
    pub terminate_on_unauthorized: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        FetchConfig::default().breaker()
    }
}
