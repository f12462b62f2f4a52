//! Transport boundary, error taxonomy, pagination and aggregation

use crate::{Payload, Request};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod aggregate;
pub mod http;
pub mod pagination;
pub mod retry_formatter;

pub use aggregate::{aggregate, AggregateError, BatchResult};
pub use pagination::{Batch, BatchGenerator};

/// Transport-level errors (no HTTP status was obtained)
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The call did not finish within the configured timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Request could not be built (bad URL, bad header)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Any other network failure
    #[error("network error: {0}")]
    Network(String),
}

/// Result type for transport calls
pub type TransportResult<T> = Result<T, TransportError>;

/// Undecoded upstream response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Build a response from a status and a body.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP GET transport used by the fetch session.
///
/// Implementations perform exactly one network call per invocation. Retries,
/// throttling and timeouts are layered on top by
/// [`FetchSession`](crate::downloader::FetchSession).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET for `request`.
    async fn get(&self, request: &Request) -> TransportResult<RawResponse>;
}

/// Failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// 4xx responses, including 429
    Client,
    /// 5xx responses
    Server,
    /// Transport failures, malformed bodies, unexpected statuses
    Data,
    /// Cancellation arrived before the request could resolve
    Cancelled,
}

impl ErrorKind {
    /// Stable uppercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "CLIENT",
            Self::Server => "SERVER",
            Self::Data => "DATA",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Classify an HTTP status. Returns `None` for 2xx.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            400..=499 => Some(Self::Client),
            500..=599 => Some(Self::Server),
            _ => Some(Self::Data),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure recorded once retries are exhausted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Failure class
    pub kind: ErrorKind,
    /// Last HTTP status seen, if any
    pub status: Option<u16>,
    /// Last error message
    pub message: String,
    /// Attempts made before giving up
    pub attempts: u32,
}

impl Failure {
    /// Create a failure record.
    pub fn new(kind: ErrorKind, status: Option<u16>, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            attempts,
        }
    }

    /// Whether the failure came from an authorization rejection (401/403)
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{}({}) after {} attempts: {}", self.kind, status, self.attempts, self.message),
            None => write!(f, "{} after {} attempts: {}", self.kind, self.attempts, self.message),
        }
    }
}

/// Result of one request: a decoded payload or a typed failure
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 2xx response with a JSON body
    Success {
        /// Decoded body
        payload: Payload,
        /// Attempts it took
        attempts: u32,
    },
    /// Retries exhausted, cancelled, or not retryable
    Failure(Failure),
}

impl Outcome {
    /// Whether this outcome carries a payload
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Payload of a successful outcome
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Outcome::Success { payload, .. } => Some(payload),
            Outcome::Failure(_) => None,
        }
    }

    /// Failure record of a failed outcome
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure(failure) => Some(failure),
        }
    }

    /// Attempts made for this request
    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Success { attempts, .. } => *attempts,
            Outcome::Failure(failure) => failure.attempts,
        }
    }
}
