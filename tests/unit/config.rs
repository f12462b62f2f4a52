//! Configuration loading and derived policies

use page_harvester::downloader::config::calculate_backoff;
use page_harvester::downloader::{ClientErrorPolicy, ConfigError, FetchConfig};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_load_full_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("harvest.toml");
    std::fs::write(
        &path,
        r#"
batch_size = 50
max_requests = 1000
max_concurrency = 16
max_attempts = 4
timeout_secs = 10
backoff_unit_ms = 250
failure_rate_threshold = 0.25
consecutive_failure_limit = 2
cooldown_secs = 5
trial_batch_size = 3
client_error_policy = "rate_limit_only"
terminate_on_unauthorized = false
throttle_max_rate = 20
"#,
    )
    .unwrap();

    let config = FetchConfig::load(&path).unwrap();
    assert_eq!(config.batch_size, 50);
    assert_eq!(config.max_requests, 1000);
    assert_eq!(config.retries, 4);
    assert_eq!(config.client_error_policy, ClientErrorPolicy::RateLimitOnly);
    assert!(!config.terminate_on_unauthorized);

    let policy = config.retry_policy();
    assert_eq!(policy.max_attempts, 4);
    assert_eq!(policy.timeout, Duration::from_secs(10));
    assert_eq!(policy.backoff(1), Duration::from_millis(500));

    let breaker = config.breaker();
    assert_eq!(breaker.failure_rate_threshold, 0.25);
    assert_eq!(breaker.consecutive_failure_limit, 2);
    assert_eq!(breaker.cooldown, Duration::from_secs(5));
    assert_eq!(breaker.trial_batch_size, 3);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = FetchConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_unknown_policy_is_parse_error() {
    let err = FetchConfig::from_toml_str("client_error_policy = \"sometimes\"").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_out_of_range_threshold_is_rejected() {
    let err = FetchConfig::from_toml_str("failure_rate_threshold = 1.5").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_non_finite_cooldown_multiplier_is_rejected() {
    for value in ["inf", "+inf", "nan"] {
        let err = FetchConfig::from_toml_str(&format!("cooldown_multiplier = {value}")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{value}");
    }
    // Finite but huge values are accepted; the breaker caps growth at max_cooldown
    assert!(FetchConfig::from_toml_str("cooldown_multiplier = 1e300").is_ok());
}

#[test]
fn test_backoff_doubles_and_caps() {
    let unit = Duration::from_secs(1);
    let max = Duration::from_secs(10);
    assert_eq!(calculate_backoff(unit, max, 1), Duration::from_secs(2));
    assert_eq!(calculate_backoff(unit, max, 2), Duration::from_secs(4));
    assert_eq!(calculate_backoff(unit, max, 3), Duration::from_secs(8));
    assert_eq!(calculate_backoff(unit, max, 4), max);
    assert_eq!(calculate_backoff(unit, max, 40), max);
}
