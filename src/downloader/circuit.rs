//! Batch-level circuit breaker.
//!
//! # States
//! - Closed: batches flow normally
//! - Open: no batches run until the cool-down expires
//! - Half-Open: exactly one reduced trial batch is let through
//! - Terminated: stopped by cancellation or an authorization rejection
//! - Complete: the generator ran out of pages
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive bad batches >= limit (bad = failure rate > threshold)
//! Open → Half-Open: cool-down elapsed, first admit() after that
//! Half-Open → Closed: trial batch had no failures (counters and cool-down reset)
//! Half-Open → Open: trial batch had any failure (cool-down grows, capped)
//! any → Terminated: terminate(), or a 401/403 outcome when enabled
//! Closed | Half-Open → Complete: complete()
//! ```
//!
//! Terminated and Complete are terminal: every later `admit()` returns
//! [`Admission::Stop`].

use crate::downloader::config::BreakerConfig;
use crate::fetcher::BatchResult;
use crate::metrics::{MetricsSink, NoopMetrics};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// How long a caller waits before asking again while a trial batch is out.
pub const HALF_OPEN_POLL: Duration = Duration::from_millis(50);

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Cooling down after sustained failure
    Open,
    /// One trial batch allowed
    HalfOpen,
    /// Stopped for good; unrecoverable
    Terminated,
    /// Generator exhausted; normal end
    Complete,
}

impl CircuitState {
    /// Stable uppercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
            Self::Terminated => "TERMINATED",
            Self::Complete => "COMPLETE",
        }
    }

    /// Whether no further batches may ever run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Complete)
    }

    /// Numeric value exported on the `circuit_state` gauge
    pub fn as_gauge(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
            Self::Terminated => 3.0,
            Self::Complete => 4.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run was terminated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The cancellation signal fired
    Cancelled,
    /// Upstream rejected authorization with this status
    Unauthorized(u16),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::Unauthorized(status) => write!(f, "authorization rejected ({status})"),
        }
    }
}

/// Verdict of [`CircuitBreaker::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Run the next batch. `trial` asks for a reduced half-open batch.
    Allowed {
        /// Whether this is the half-open trial batch
        trial: bool,
    },
    /// Do not run a batch; ask again after the given duration.
    Blocked(Duration),
    /// Terminal state reached; stop the loop.
    Stop,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_bad: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    trial_outstanding: bool,
    stop_reason: Option<StopReason>,
}

/// Failure-gating state machine consulted before and after every batch
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    metrics: Arc<dyn MetricsSink>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(config: BreakerConfig) -> Self {
        let cooldown = config.cooldown;
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_bad: 0,
                opened_at: None,
                cooldown,
                trial_outstanding: false,
                stop_reason: None,
            }),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Report transitions to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        info!(
            from = from.as_str(),
            to = to.as_str(),
            consecutive_bad = inner.consecutive_bad,
            cooldown_ms = inner.cooldown.as_millis() as u64,
            "Circuit breaker transition"
        );
        self.metrics.circuit_transition(from, to);
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Consecutive bad batches counted while closed
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_bad
    }

    /// Cool-down that applies the next time the circuit is open
    pub fn cooldown(&self) -> Duration {
        self.lock().cooldown
    }

    /// Reason recorded when the breaker terminated
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.lock().stop_reason.clone()
    }

    /// Size of the half-open trial batch
    pub fn trial_batch_size(&self) -> usize {
        self.config.trial_batch_size
    }

    /// Decide whether the next batch may run.
    pub fn admit(&self) -> Admission {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Admission::Allowed { trial: false },
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or(inner.cooldown);
                if elapsed >= inner.cooldown {
                    inner.trial_outstanding = true;
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    Admission::Allowed { trial: true }
                } else {
                    Admission::Blocked(inner.cooldown - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_outstanding {
                    Admission::Blocked(HALF_OPEN_POLL)
                } else {
                    inner.trial_outstanding = true;
                    Admission::Allowed { trial: true }
                }
            }
            CircuitState::Terminated | CircuitState::Complete => Admission::Stop,
        }
    }

    /// Drive transitions from a finished batch. Returns the resulting state.
    pub fn report(&self, result: &BatchResult) -> CircuitState {
        let mut inner = self.lock();

        if inner.state.is_terminal() || inner.state == CircuitState::Open {
            warn!(
                state = inner.state.as_str(),
                batch_id = result.batch_id(),
                "Ignoring batch report outside closed/half-open state"
            );
            return inner.state;
        }

        if self.config.terminate_on_unauthorized {
            if let Some(status) = result.unauthorized_status() {
                warn!(status = status, batch_id = result.batch_id(), "Authorization rejected, terminating");
                inner.stop_reason = Some(StopReason::Unauthorized(status));
                inner.trial_outstanding = false;
                self.transition(&mut inner, CircuitState::Terminated);
                return inner.state;
            }
        }

        let rate = result.failure_rate();
        match inner.state {
            CircuitState::Closed => {
                if rate > self.config.failure_rate_threshold {
                    inner.consecutive_bad += 1;
                    warn!(
                        batch_id = result.batch_id(),
                        failure_rate = rate,
                        consecutive_bad = inner.consecutive_bad,
                        limit = self.config.consecutive_failure_limit,
                        "Bad batch"
                    );
                } else {
                    inner.consecutive_bad = 0;
                }

                if inner.consecutive_bad >= self.config.consecutive_failure_limit {
                    inner.opened_at = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.trial_outstanding = false;
                if result.failures() == 0 {
                    inner.consecutive_bad = 0;
                    inner.cooldown = self.config.cooldown;
                    inner.opened_at = None;
                    self.transition(&mut inner, CircuitState::Closed);
                } else {
                    inner.cooldown = grow_cooldown(
                        inner.cooldown,
                        self.config.cooldown_multiplier,
                        self.config.max_cooldown,
                    );
                    inner.opened_at = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Open | CircuitState::Terminated | CircuitState::Complete => {}
        }

        inner.state
    }

    /// Stop for good. Returns `false` if already terminal.
    pub fn terminate(&self, reason: StopReason) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.stop_reason = Some(reason);
        inner.trial_outstanding = false;
        self.transition(&mut inner, CircuitState::Terminated);
        true
    }

    /// Mark the run complete. Only valid from closed or half-open.
    pub fn complete(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => {
                inner.trial_outstanding = false;
                self.transition(&mut inner, CircuitState::Complete);
                true
            }
            state => {
                warn!(state = state.as_str(), "Cannot complete from this state");
                false
            }
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("state", &inner.state)
            .field("consecutive_bad", &inner.consecutive_bad)
            .field("cooldown", &inner.cooldown)
            .finish()
    }
}

/// `current × multiplier`, capped at `max`. Products a `Duration` cannot hold
/// saturate to `max`.
fn grow_cooldown(current: Duration, multiplier: f64, max: Duration) -> Duration {
    Duration::try_from_secs_f64(current.as_secs_f64() * multiplier)
        .map(|grown| grown.min(max))
        .unwrap_or(max)
}
