//! Batch execution with bounded concurrency and per-request retry
//!
//! Every request of a batch runs concurrently behind the session-wide
//! [`AdmissionGate`]. Outcomes are buffered by `join_all`, so the batch result
//! keeps request order whatever order requests finish in.
//!
//! Per request the attempt loop is
//! `throttle.acquire → GET (timeout) → throttle.release → throttle.delay`, for
//! every attempt that reached the network.
//! A failed attempt `k` sleeps `unit * 2^k` before attempt `k + 1`. When the
//! attempts run out the request resolves to [`Outcome::Failure`]; it never
//! errors.

use futures::future::join_all;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, debug_span, error, info, warn, Instrument};

use crate::downloader::config::{FetchConfig, RetryPolicy};
use crate::downloader::gate::AdmissionGate;
use crate::downloader::rate_limit::Throttle;
use crate::downloader::EngineError;
use crate::fetcher::retry_formatter::{classify_status, classify_transport, RetryContext, RetryErrorType};
use crate::fetcher::{aggregate, Batch, BatchResult, ErrorKind, Failure, Outcome, RawResponse, Transport, TransportError, TransportResult};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::shutdown::{ShutdownCoordinator, SharedShutdown};
use crate::{Payload, Request};

/// Result of one attempt that did not produce a payload
struct AttemptError {
    error_type: RetryErrorType,
    status: Option<u16>,
    message: String,
}

/// Executes batches against one upstream
pub struct FetchSession {
    transport: Arc<dyn Transport>,
    throttle: Arc<dyn Throttle>,
    gate: AdmissionGate,
    policy: RetryPolicy,
    metrics: Arc<dyn MetricsSink>,
    shutdown: SharedShutdown,
}

impl FetchSession {
    /// Create a session.
    ///
    /// The admission gate is sized `max(config.max_concurrency, throttle.max_rate())`.
    pub fn new(transport: Arc<dyn Transport>, throttle: Arc<dyn Throttle>, config: &FetchConfig) -> Self {
        let ceiling = config.max_concurrency.max(throttle.max_rate());
        Self {
            transport,
            throttle,
            gate: AdmissionGate::new(ceiling),
            policy: config.retry_policy(),
            metrics: Arc::new(NoopMetrics),
            shutdown: ShutdownCoordinator::shared(),
        }
    }

    /// Report counters to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Observe `shutdown` at every suspension point.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Session-wide admission gate
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Active retry policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Cancellation signal observed by this session
    pub fn shutdown(&self) -> &SharedShutdown {
        &self.shutdown
    }

    /// Metrics sink shared with the driving loop
    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    /// Execute every request of `batch` and aggregate the outcomes.
    ///
    /// # Errors
    /// Only [`EngineError::Aggregate`], which indicates a defect.
    pub async fn run(&self, batch: Batch) -> Result<BatchResult, EngineError> {
        let started = Instant::now();
        let span = debug_span!("batch", batch_id = batch.id(), size = batch.len());

        let outcomes = join_all(batch.requests().iter().map(|request| self.fetch(request)))
            .instrument(span)
            .await;

        let result = aggregate(batch, outcomes, started.elapsed())?;
        self.metrics.batch_completed(&result);

        debug!(
            batch_id = result.batch_id(),
            successes = result.successes(),
            failures = result.failures(),
            elapsed_ms = result.elapsed().as_millis() as u64,
            "Batch finished"
        );
        Ok(result)
    }

    /// Resolve one request to an outcome.
    pub async fn fetch(&self, request: &Request) -> Outcome {
        if self.shutdown.is_shutdown_requested() {
            return self.cancelled(request, 0);
        }

        let _pass = tokio::select! {
            biased;
            _ = self.shutdown.wait_for_shutdown() => return self.cancelled(request, 0),
            pass = self.gate.acquire() => match pass {
                Some(pass) => pass,
                None => return self.cancelled(request, 0),
            },
        };

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_shutdown_requested() {
                return self.cancelled(request, attempt);
            }
            attempt += 1;

            let failure = match self.attempt(request).await {
                Some(Ok(payload)) => {
                    self.metrics.request_succeeded();
                    if attempt > 1 {
                        let ctx = RetryContext::new(
                            attempt,
                            max_attempts,
                            RetryErrorType::NetworkGeneric,
                            request.page(),
                            "",
                            request.endpoint(),
                        );
                        info!(page = request.page(), attempt = attempt, "{}", ctx.format_success());
                    }
                    return Outcome::Success {
                        payload,
                        attempts: attempt,
                    };
                }
                Some(Err(failure)) => failure,
                None => return self.cancelled(request, attempt),
            };

            let ctx = RetryContext::new(
                attempt,
                max_attempts,
                failure.error_type,
                request.page(),
                failure.message.clone(),
                request.endpoint(),
            );
            let kind = failure.error_type.kind();

            let retryable = attempt < max_attempts
                && self.policy.client_errors.allows_retry(failure.error_type);
            if !retryable {
                error!(
                    page = request.page(),
                    attempt = attempt,
                    status = ?failure.status,
                    kind = kind.as_str(),
                    "{}",
                    ctx.format_failure()
                );
                self.metrics.request_failed(kind);
                return Outcome::Failure(Failure::new(kind, failure.status, failure.message, attempt));
            }

            let backoff = self.policy.backoff(attempt);
            let ctx = ctx.with_backoff(backoff);
            warn!(
                page = request.page(),
                attempt = attempt,
                status = ?failure.status,
                kind = kind.as_str(),
                backoff_ms = backoff.as_millis() as u64,
                "{}",
                ctx.format_retry()
            );
            self.metrics.retry_scheduled(attempt, backoff);

            tokio::select! {
                biased;
                _ = self.shutdown.wait_for_shutdown() => return self.cancelled(request, attempt),
                _ = sleep(backoff) => {}
            }
        }
    }

    /// One throttled attempt. `None` means cancellation won.
    async fn attempt(&self, request: &Request) -> Option<Result<Payload, AttemptError>> {
        let acquired = tokio::select! {
            biased;
            _ = self.shutdown.wait_for_shutdown() => return None,
            acquired = self.throttle.acquire() => acquired,
        };
        if let Err(e) = acquired {
            return Some(Err(AttemptError {
                error_type: RetryErrorType::Throttled,
                status: None,
                message: e.to_string(),
            }));
        }

        self.metrics.request_attempted();
        debug!(page = request.page(), endpoint = request.endpoint(), "Issuing request");

        let response = self.call_with_grace(request).await;
        self.throttle.release();
        let response = response?;

        // Pacing applies to every attempt that reached the network
        tokio::select! {
            biased;
            _ = self.shutdown.wait_for_shutdown() => {}
            _ = self.throttle.delay() => {}
        }

        let outcome = match response {
            Ok(raw) if raw.is_success() => decode(raw),
            Ok(raw) => {
                let error_type = classify_status(raw.status).unwrap_or(RetryErrorType::UnexpectedStatus(raw.status));
                Err(AttemptError {
                    error_type,
                    status: Some(raw.status),
                    message: format!("HTTP {}: {}", raw.status, error_type.description()),
                })
            }
            Err(e) => Err(AttemptError {
                error_type: classify_transport(&e),
                status: None,
                message: e.to_string(),
            }),
        };

        Some(outcome)
    }

    /// Network call under the per-attempt timeout. After cancellation the call
    /// gets the grace period to finish; `None` if it does not.
    async fn call_with_grace(&self, request: &Request) -> Option<TransportResult<RawResponse>> {
        let limit = self.policy.timeout;
        let call = timeout(limit, self.transport.get(request));
        tokio::pin!(call);

        let finished = tokio::select! {
            biased;
            res = &mut call => res,
            _ = self.shutdown.wait_for_shutdown() => {
                debug!(page = request.page(), "Cancellation during request, waiting for grace period");
                timeout(self.policy.cancel_grace, &mut call).await.ok()?
            }
        };

        Some(finished.unwrap_or(Err(TransportError::Timeout(limit))))
    }

    fn cancelled(&self, request: &Request, attempts: u32) -> Outcome {
        debug!(page = request.page(), attempts = attempts, "Request cancelled");
        self.metrics.request_failed(ErrorKind::Cancelled);
        Outcome::Failure(Failure::new(ErrorKind::Cancelled, None, "cancelled", attempts))
    }
}

fn decode(raw: RawResponse) -> Result<Payload, AttemptError> {
    serde_json::from_slice(&raw.body).map_err(|e| AttemptError {
        error_type: RetryErrorType::MalformedBody,
        status: Some(raw.status),
        message: format!("invalid JSON body: {e}"),
    })
}

impl std::fmt::Debug for FetchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchSession")
            .field("gate_capacity", &self.gate.capacity())
            .field("policy", &self.policy)
            .finish()
    }
}
