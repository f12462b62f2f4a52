//! Fetch orchestration
//!
//! This module provides the resilient batched-fetch engine: a throttle
//! contract, a session-wide admission gate, the per-request attempt loop, a
//! batch-level circuit breaker and the loop that drives them.
//!
//! # Overview
//!
//! 1. **Generation**: [`crate::fetcher::BatchGenerator`] yields page batches
//! 2. **Gating**: [`circuit::CircuitBreaker`] admits, delays or stops each batch
//! 3. **Execution**: [`session::FetchSession`] runs a batch under [`gate::AdmissionGate`] and a [`rate_limit::Throttle`]
//! 4. **Driving**: [`executor::Harvester`] loops until the breaker is terminal
//! 5. **Resume Support**: the bookmark is saved after every batch
//!
//! # Components
//!
//! - [`executor`] - Driving loop and run summary
//! - [`session`] - Batch execution and retry
//! - [`circuit`] - Circuit breaker state machine
//! - [`gate`] - Admission gate
//! - [`rate_limit`] - Throttle contract and window throttle
//! - [`job`] - Job status and progress counters
//! - [`progress`] - Periodic progress lines
//! - [`config`] - Configuration, defaults and backoff calculation
//!
//! # Error Handling
//!
//! Per-request failures become [`crate::Outcome::Failure`] and never surface
//! as errors. [`EngineError`] covers only collaborator failures and defects.

pub mod circuit;
pub mod config;
pub mod executor;
pub mod gate;
pub mod job;
pub mod progress;
pub mod rate_limit;
pub mod session;

pub use circuit::{Admission, CircuitBreaker, CircuitState, StopReason};
pub use config::{ClientErrorPolicy, ConfigError, FetchConfig, RetryPolicy};
pub use executor::{Harvester, RunOutcome, RunSummary};
pub use gate::AdmissionGate;
pub use job::{JobProgress, JobStatus};
pub use rate_limit::{Throttle, ThrottleError, WindowThrottle};
pub use session::FetchSession;

use crate::fetcher::AggregateError;
use crate::output::OutputError;
use crate::resume::ResumeError;

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Outcomes could not be paired with requests
    #[error("aggregation error: {0}")]
    Aggregate(#[from] AggregateError),

    /// The batch sink failed
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Resume state could not be saved
    #[error("resume error: {0}")]
    Resume(#[from] ResumeError),
}
