//! Batch result aggregation
//!
//! Pairs a batch's requests 1:1 with their outcomes. The pairing is positional:
//! outcomes must arrive in request order, which the session guarantees by
//! buffering results rather than by serializing execution.

use crate::fetcher::pagination::Batch;
use crate::fetcher::{ErrorKind, Outcome};
use crate::Request;
use std::time::Duration;

/// Aggregation errors. Any of these indicates a defect in the caller.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    /// Outcome count does not match request count
    #[error("batch {batch_id}: expected {expected} outcomes, got {actual}")]
    OutcomeCountMismatch {
        /// Batch sequence number
        batch_id: u64,
        /// Requests in the batch
        expected: usize,
        /// Outcomes supplied
        actual: usize,
    },
}

/// A batch's requests paired with their outcomes. Immutable once built.
#[derive(Debug, Clone)]
pub struct BatchResult {
    batch_id: u64,
    requests: Vec<Request>,
    outcomes: Vec<Outcome>,
    successes: usize,
    failures: usize,
    elapsed: Duration,
}

impl BatchResult {
    /// Sequence number of the batch
    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    /// Requests in input order
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Outcomes aligned with [`requests`](Self::requests)
    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// Request/outcome pairs in input order
    pub fn iter(&self) -> impl Iterator<Item = (&Request, &Outcome)> {
        self.requests.iter().zip(self.outcomes.iter())
    }

    /// Number of requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the batch was empty
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Successful outcomes
    pub fn successes(&self) -> usize {
        self.successes
    }

    /// Failed outcomes
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Wall time spent executing the batch
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Fraction of failed outcomes in `[0, 1]`; `0` for an empty batch
    pub fn failure_rate(&self) -> f64 {
        if self.requests.is_empty() {
            return 0.0;
        }
        self.failures as f64 / self.requests.len() as f64
    }

    /// Pages whose outcome is a failure
    pub fn failed_pages(&self) -> Vec<u64> {
        self.iter()
            .filter(|(_, outcome)| !outcome.is_success())
            .map(|(request, _)| request.page())
            .collect()
    }

    /// Number of failures of `kind`
    pub fn failures_of(&self, kind: ErrorKind) -> usize {
        self.outcomes
            .iter()
            .filter_map(Outcome::failure)
            .filter(|failure| failure.kind == kind)
            .count()
    }

    /// First authorization rejection status (401/403) in the batch, if any
    pub fn unauthorized_status(&self) -> Option<u16> {
        self.outcomes
            .iter()
            .filter_map(Outcome::failure)
            .find(|failure| failure.is_unauthorized())
            .and_then(|failure| failure.status)
    }
}

/// Assemble a [`BatchResult`] from a batch and its ordered outcomes.
///
/// # Errors
/// Returns [`AggregateError::OutcomeCountMismatch`] when any request lacks an
/// outcome (or extra outcomes are supplied). Nothing is dropped silently.
pub fn aggregate(
    batch: Batch,
    outcomes: Vec<Outcome>,
    elapsed: Duration,
) -> Result<BatchResult, AggregateError> {
    if batch.len() != outcomes.len() {
        return Err(AggregateError::OutcomeCountMismatch {
            batch_id: batch.id(),
            expected: batch.len(),
            actual: outcomes.len(),
        });
    }

    let successes = outcomes.iter().filter(|o| o.is_success()).count();
    let failures = outcomes.len() - successes;
    let batch_id = batch.id();

    Ok(BatchResult {
        batch_id,
        requests: batch.into_requests(),
        outcomes,
        successes,
        failures,
        elapsed,
    })
}
