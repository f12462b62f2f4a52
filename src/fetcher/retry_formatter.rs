//! Retry classification and log message formatting.
//!
//! Every failed attempt is classified into a [`RetryErrorType`], which maps
//! onto the coarse [`ErrorKind`] taxonomy used by outcomes and metrics, and is
//! described to the operator through a [`RetryContext`].

use crate::fetcher::{ErrorKind, TransportError};
use std::time::Duration;

/// Detailed classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Call exceeded the configured timeout
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// Authentication failures (401/403)
    AuthFailed(u16),
    /// Other client errors (4xx, except 429)
    ClientError(u16),
    /// 2xx response whose body could not be decoded
    MalformedBody,
    /// Status outside 2xx/4xx/5xx
    UnexpectedStatus(u16),
    /// Rate gate refused to admit the attempt
    Throttled,
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// Coarse failure class used by outcomes and metrics
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimit | Self::AuthFailed(_) | Self::ClientError(_) => ErrorKind::Client,
            Self::ServerError(_) => ErrorKind::Server,
            Self::NetworkTimeout
            | Self::NetworkOffline
            | Self::MalformedBody
            | Self::UnexpectedStatus(_)
            | Self::Throttled
            | Self::NetworkGeneric => ErrorKind::Data,
        }
    }

    /// HTTP status carried by this classification, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimit => Some(429),
            Self::ServerError(code)
            | Self::AuthFailed(code)
            | Self::ClientError(code)
            | Self::UnexpectedStatus(code) => Some(*code),
            _ => None,
        }
    }

    /// Whether this is a 429
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimit)
    }

    /// User-friendly description string used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "authentication failed (403)",
                _ => "authentication failed",
            },
            Self::ClientError(code) => match code {
                400 => "invalid request",
                404 => "resource not found",
                _ => "client error",
            },
            Self::MalformedBody => "malformed response body",
            Self::UnexpectedStatus(_) => "unexpected response status",
            Self::Throttled => "throttle unavailable",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation presented after retries are exhausted.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection or raise --timeout",
            Self::NetworkOffline => "Verify internet connectivity, proxy settings and DNS resolution",
            Self::RateLimit => "Lower the throttle rate or --concurrency",
            Self::ServerError(_) => "Upstream may be experiencing issues, try again later",
            Self::AuthFailed(_) => "Rotate request headers or credentials",
            Self::ClientError(_) => "Review the query parameters (category id, limit, offset)",
            Self::MalformedBody => "Upstream returned non-JSON content, it may be blocking the client",
            Self::UnexpectedStatus(_) => "Check whether the endpoint redirects",
            Self::Throttled => "Check throttle configuration",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }
}

/// Classify an HTTP status. Returns `None` for 2xx.
pub fn classify_status(status: u16) -> Option<RetryErrorType> {
    match status {
        200..=299 => None,
        401 | 403 => Some(RetryErrorType::AuthFailed(status)),
        429 => Some(RetryErrorType::RateLimit),
        400..=499 => Some(RetryErrorType::ClientError(status)),
        500..=599 => Some(RetryErrorType::ServerError(status)),
        _ => Some(RetryErrorType::UnexpectedStatus(status)),
    }
}

/// Classify a transport error.
pub fn classify_transport(err: &TransportError) -> RetryErrorType {
    match err {
        TransportError::Timeout(_) => RetryErrorType::NetworkTimeout,
        TransportError::Connect(_) => RetryErrorType::NetworkOffline,
        TransportError::InvalidRequest(_) | TransportError::Network(_) => {
            RetryErrorType::NetworkGeneric
        }
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered retry
    pub error_type: RetryErrorType,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// Page being fetched
    pub page: u64,
    /// Original error message for details
    pub error_message: String,
    /// Endpoint that failed
    pub endpoint: String,
}

impl RetryContext {
    /// Convenience constructor used throughout the attempt loop.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error_type: RetryErrorType,
        page: u64,
        error_message: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type,
            backoff_duration: Duration::ZERO,
            page,
            error_message: error_message.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Set the backoff that precedes the next attempt.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_duration = backoff;
        self
    }

    /// Format standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying page {} (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.page,
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        )
    }

    /// Format retry success message when a previous attempt eventually works.
    pub fn format_success(&self) -> String {
        format!(
            "Page {} succeeded on attempt {}/{}",
            self.page, self.attempt, self.max_attempts
        )
    }

    /// Format final failure summary with actionable suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = vec![
            format!(
                "[FAILED] Page {} failed after {} attempts",
                self.page, self.attempt
            ),
            format!("  Last error: {}", self.error_message),
            format!("  Class: {}", self.error_type.kind()),
            format!("  Endpoint: {}", self.endpoint),
            "  Suggestions:".to_string(),
        ];

        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }

        lines.join("\n")
    }

    /// Derive suggestions tailored to the current retry context.
    pub fn format_suggestions(&self) -> Vec<String> {
        vec![
            self.error_type.suggestion().to_string(),
            format!("Try increasing --retries (current: {})", self.max_attempts),
        ]
    }
}
