//! Harvest driving loop
//!
//! ```text
//! admit() ─ Stop ──────────────────────────────▶ summary
//!    │ Blocked(wait) → sleep (cancellable) → admit()
//!    ▼ Allowed{trial}
//! generator.next_batch[_limited] ─ None → complete()
//!    ▼
//! session.run → sink.accept → breaker.report → resume save → progress
//! ```

use std::path::PathBuf;
use tokio::time::sleep;
use tracing::{info, info_span, warn, Instrument};

use crate::downloader::circuit::{Admission, CircuitBreaker, CircuitState, StopReason};
use crate::downloader::config::FetchConfig;
use crate::downloader::job::{JobProgress, JobStatus};
use crate::downloader::progress::ProgressState;
use crate::downloader::session::FetchSession;
use crate::downloader::EngineError;
use crate::fetcher::BatchGenerator;
use crate::output::BatchSink;
use crate::resume::{Bookmark, ResumeState};

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The generator was exhausted
    Complete,
    /// The breaker terminated the run
    Stopped(StopReason),
}

/// Final report of [`Harvester::run`]
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// How the run ended
    pub outcome: RunOutcome,
    /// Final circuit state
    pub state: CircuitState,
    /// Final job status
    pub status: JobStatus,
    /// Counters accumulated during the run
    pub progress: JobProgress,
    /// Cursor to restart from
    pub bookmark: Bookmark,
}

/// Drives a [`BatchGenerator`] through a [`FetchSession`] under a [`CircuitBreaker`].
#[derive(Debug)]
pub struct Harvester {
    session: FetchSession,
    breaker: CircuitBreaker,
    resume_path: Option<PathBuf>,
    resume_state: Option<ResumeState>,
}

impl Harvester {
    /// Create a harvester; the breaker reports to the session's metrics sink.
    pub fn new(session: FetchSession, config: &FetchConfig) -> Self {
        let breaker = CircuitBreaker::new(config.breaker()).with_metrics(session.metrics().clone());
        Self {
            session,
            breaker,
            resume_path: None,
            resume_state: None,
        }
    }

    /// Save resume state to `path` after every batch.
    pub fn with_resume_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.resume_path = Some(path.into());
        self
    }

    /// Continue from previously loaded state instead of starting a fresh one.
    pub fn with_resume_state(mut self, state: ResumeState) -> Self {
        self.resume_state = Some(state);
        self
    }

    /// The session executing batches
    pub fn session(&self) -> &FetchSession {
        &self.session
    }

    /// The breaker gating batches
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run until the breaker reaches a terminal state.
    ///
    /// Per-request failures never make this return `Err`; they are in the
    /// batch results handed to `sink`. Errors come from the sink, the resume
    /// file, or an aggregation defect.
    pub async fn run(
        &self,
        generator: &mut BatchGenerator,
        sink: &mut dyn BatchSink,
    ) -> Result<RunSummary, EngineError> {
        let span = info_span!(
            "harvest",
            query = %generator.query().key(),
            start_page = generator.bookmark().next_page,
            remaining = generator.remaining(),
        );
        self.drive(generator, sink).instrument(span).await
    }

    async fn drive(
        &self,
        generator: &mut BatchGenerator,
        sink: &mut dyn BatchSink,
    ) -> Result<RunSummary, EngineError> {
        let shutdown = self.session.shutdown().clone();
        let mut progress = JobProgress::with_budget(generator.remaining_budget().unwrap_or(u64::MAX));
        let mut progress_state = ProgressState::new(progress.total_requests);
        let mut status = JobStatus::InProgress;
        let mut resume = self.resume_path.as_ref().map(|path| {
            let state = self
                .resume_state
                .clone()
                .unwrap_or_else(|| ResumeState::new(generator.query().key(), generator.bookmark()));
            (path.clone(), state)
        });

        info!(budget = ?progress.total_requests, "Harvest started");

        loop {
            if shutdown.is_shutdown_requested() {
                self.breaker.terminate(StopReason::Cancelled);
            }

            match self.breaker.admit() {
                Admission::Stop => break,
                Admission::Blocked(wait) => {
                    if status != JobStatus::Paused {
                        info!(wait_ms = wait.as_millis() as u64, "Circuit open, pausing");
                    }
                    status = JobStatus::Paused;
                    tokio::select! {
                        biased;
                        _ = shutdown.wait_for_shutdown() => {}
                        _ = sleep(wait) => {}
                    }
                }
                Admission::Allowed { trial } => {
                    status = JobStatus::InProgress;
                    let batch = if trial {
                        generator.next_batch_limited(self.breaker.trial_batch_size())
                    } else {
                        generator.next_batch()
                    };
                    let Some(batch) = batch else {
                        self.breaker.complete();
                        continue;
                    };
                    if trial {
                        info!(batch_id = batch.id(), size = batch.len(), "Running half-open trial batch");
                    }

                    let result = self.session.run(batch).await?;
                    sink.accept(&result)?;

                    let before = self.breaker.state();
                    let after = self.breaker.report(&result);
                    if after == CircuitState::Open && before != CircuitState::Open {
                        progress.circuit_opens += 1;
                    }

                    progress.record(&result);
                    if let Some((path, state)) = resume.as_mut() {
                        state.record_batch(&result, generator.bookmark());
                        state.save(path)?;
                    }

                    progress_state.update(result.len() as u64, result.successes() as u64);
                    if progress_state.should_emit_update() {
                        info!("{}", progress_state.format_progress());
                        progress_state.mark_emitted();
                    }
                }
            }
        }

        sink.finish()?;

        let state = self.breaker.state();
        let reason = self.breaker.stop_reason();
        let status = JobStatus::from_circuit(state, reason.as_ref());
        let outcome = match (state, reason) {
            (CircuitState::Complete, _) => RunOutcome::Complete,
            (_, Some(reason)) => RunOutcome::Stopped(reason),
            (_, None) => RunOutcome::Stopped(StopReason::Cancelled),
        };

        match &outcome {
            RunOutcome::Complete => info!(
                batches = progress.batches,
                successes = progress.successes,
                failures = progress.failures,
                retries = progress.retries(),
                "Harvest complete"
            ),
            RunOutcome::Stopped(reason) => warn!(
                reason = %reason,
                batches = progress.batches,
                successes = progress.successes,
                failures = progress.failures,
                next_page = generator.bookmark().next_page,
                "Harvest stopped"
            ),
        }

        Ok(RunSummary {
            outcome,
            state,
            status,
            progress,
            bookmark: generator.bookmark(),
        })
    }
}
