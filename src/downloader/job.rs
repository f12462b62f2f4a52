//! Harvest job status and progress counters

use crate::downloader::circuit::{CircuitState, StopReason};
use crate::fetcher::{BatchResult, ErrorKind};
use serde::{Deserialize, Serialize};

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job has not started yet
    #[default]
    Created,
    /// Batches are being fetched
    InProgress,
    /// Waiting for the circuit breaker cool-down
    Paused,
    /// Generator exhausted
    Complete,
    /// Stopped by an unrecoverable upstream condition
    Terminated,
    /// Stopped by the cancellation signal
    Cancelled,
}

impl JobStatus {
    /// Status implied by a circuit state and the recorded stop reason.
    pub fn from_circuit(state: CircuitState, reason: Option<&StopReason>) -> Self {
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => Self::InProgress,
            CircuitState::Open => Self::Paused,
            CircuitState::Complete => Self::Complete,
            CircuitState::Terminated => match reason {
                Some(StopReason::Cancelled) => Self::Cancelled,
                _ => Self::Terminated,
            },
        }
    }

    /// Whether the job has ended
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Complete | Self::Terminated | Self::Cancelled)
    }
}

/// Job progress tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobProgress {
    /// Request budget, `None` when unbounded
    pub total_requests: Option<u64>,
    /// Batches executed
    pub batches: u64,
    /// Requests resolved to an outcome
    pub requests: u64,
    /// Successful pages
    pub successes: u64,
    /// Failed pages
    pub failures: u64,
    /// Attempts made across all requests
    pub attempts: u64,
    /// Requests that exhausted retries on 4xx
    pub failed_client: u64,
    /// Requests that exhausted retries on 5xx
    pub failed_server: u64,
    /// Requests that exhausted retries on transport or decoding errors
    pub failed_data: u64,
    /// Requests cut short by cancellation
    pub cancelled: u64,
    /// Times the circuit opened
    pub circuit_opens: u64,
}

impl JobProgress {
    /// Progress for a run with the given request budget.
    pub fn with_budget(max_requests: u64) -> Self {
        Self {
            total_requests: (max_requests != u64::MAX).then_some(max_requests),
            ..Self::default()
        }
    }

    /// Fold a finished batch into the counters.
    pub fn record(&mut self, result: &BatchResult) {
        self.batches += 1;
        self.requests += result.len() as u64;
        self.successes += result.successes() as u64;
        self.failures += result.failures() as u64;
        self.attempts += result.outcomes().iter().map(|o| u64::from(o.attempts())).sum::<u64>();
        self.failed_client += result.failures_of(ErrorKind::Client) as u64;
        self.failed_server += result.failures_of(ErrorKind::Server) as u64;
        self.failed_data += result.failures_of(ErrorKind::Data) as u64;
        self.cancelled += result.failures_of(ErrorKind::Cancelled) as u64;
    }

    /// Retries beyond the first attempt
    pub fn retries(&self) -> u64 {
        self.attempts.saturating_sub(self.requests)
    }

    /// Calculate completion percentage (0.0 to 100.0) when the budget is finite
    pub fn percentage(&self) -> Option<f64> {
        self.total_requests.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.requests as f64 / total as f64) * 100.0
            }
        })
    }
}
