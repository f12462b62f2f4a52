//! End-to-end harvest loop: budget, circuit breaker and termination

use crate::common::{test_config, CollectingSink, RecordingMetrics, RecordingThrottle, ScriptedTransport, Step};
use page_harvester::downloader::{
    CircuitState, FetchConfig, FetchSession, Harvester, JobStatus, RunOutcome, StopReason,
};
use page_harvester::fetcher::BatchGenerator;
use page_harvester::query::AppSearchQuery;
use page_harvester::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn harvester(transport: Arc<ScriptedTransport>, config: &FetchConfig) -> (Harvester, Arc<RecordingMetrics>) {
    let metrics = RecordingMetrics::shared();
    let session = FetchSession::new(transport, Arc::new(RecordingThrottle::new(1)), config)
        .with_metrics(metrics.clone());
    (Harvester::new(session, config), metrics)
}

fn generator(config: &FetchConfig, budget: u64) -> BatchGenerator {
    BatchGenerator::new(AppSearchQuery::new(6018), 0, config.batch_size, budget)
}

#[tokio::test(start_paused = true)]
async fn test_run_completes_when_budget_is_spent() {
    let config = test_config();
    let transport = Arc::new(ScriptedTransport::always_ok());
    let (harvester, metrics) = harvester(transport.clone(), &config);
    let mut generator = generator(&config, 5);
    let mut sink = CollectingSink::default();

    let summary = harvester.run(&mut generator, &mut sink).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Complete);
    assert_eq!(summary.state, CircuitState::Complete);
    assert_eq!(summary.status, JobStatus::Complete);
    assert_eq!(summary.progress.batches, 3);
    assert_eq!(summary.progress.successes, 5);
    assert_eq!(summary.bookmark.next_page, 5);
    assert_eq!(summary.bookmark.issued, 5);

    let sizes: Vec<usize> = sink.results.iter().map(|r| r.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(sink.pages(), vec![0, 1, 2, 3, 4]);
    assert_eq!(transport.calls().len(), 5);
    assert_eq!(
        metrics.transitions(),
        vec![(CircuitState::Closed, CircuitState::Complete)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_budget_completes_immediately() {
    let config = test_config();
    let transport = Arc::new(ScriptedTransport::always_ok());
    let (harvester, _) = harvester(transport.clone(), &config);
    let mut generator = generator(&config, 0);
    let mut sink = CollectingSink::default();

    let summary = harvester.run(&mut generator, &mut sink).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Complete);
    assert!(sink.results.is_empty());
    assert!(transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_terminates_run() {
    let config = FetchConfig {
        retries: 1,
        ..test_config()
    };
    let transport = Arc::new(ScriptedTransport::always_ok().script(1, vec![Step::Status(403)]));
    let (harvester, metrics) = harvester(transport.clone(), &config);
    let mut generator = generator(&config, 10);
    let mut sink = CollectingSink::default();

    let summary = harvester.run(&mut generator, &mut sink).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Stopped(StopReason::Unauthorized(403)));
    assert_eq!(summary.state, CircuitState::Terminated);
    assert_eq!(summary.status, JobStatus::Terminated);
    assert_eq!(summary.bookmark.next_page, 2);
    assert_eq!(sink.results.len(), 1);
    assert_eq!(transport.calls().len(), 2);
    assert_eq!(metrics.failed(ErrorKind::Client), 1);
    assert_eq!(
        metrics.transitions(),
        vec![(CircuitState::Closed, CircuitState::Terminated)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_is_ordinary_failure_when_disabled() {
    let config = FetchConfig {
        retries: 1,
        terminate_on_unauthorized: false,
        ..test_config()
    };
    let transport = Arc::new(ScriptedTransport::always_ok().script(1, vec![Step::Status(401)]));
    let (harvester, _) = harvester(transport, &config);
    let mut generator = generator(&config, 4);
    let mut sink = CollectingSink::default();

    let summary = harvester.run(&mut generator, &mut sink).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Complete);
    assert_eq!(summary.progress.failures, 1);
    assert_eq!(summary.progress.failed_client, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failing_trial_reopens_with_longer_cooldown() {
    let config = FetchConfig {
        retries: 1,
        ..test_config()
    };
    let transport = Arc::new(ScriptedTransport::new(Step::Status(500)));
    let (harvester, metrics) = harvester(transport.clone(), &config);
    let mut generator = generator(&config, 7);
    let mut sink = CollectingSink::default();

    let started = Instant::now();
    let summary = harvester.run(&mut generator, &mut sink).await.unwrap();

    use CircuitState::*;
    assert_eq!(
        metrics.transitions(),
        vec![
            (Closed, Open),
            (Open, HalfOpen),
            (HalfOpen, Open),
            (Open, HalfOpen),
            (HalfOpen, Complete),
        ]
    );
    assert_eq!(summary.outcome, RunOutcome::Complete);
    assert_eq!(summary.progress.circuit_opens, 2);
    assert_eq!(summary.progress.failures, 7);
    // Three full batches, then a single-page trial
    let sizes: Vec<usize> = sink.results.iter().map(|r| r.len()).collect();
    assert_eq!(sizes, vec![2, 2, 2, 1]);
    // 10s first cool-down, 20s after the failed trial
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(harvester.breaker().cooldown(), Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_successful_trial_closes_circuit() {
    let config = FetchConfig {
        retries: 1,
        ..test_config()
    };
    let mut transport = ScriptedTransport::always_ok();
    for page in 0..6 {
        transport = transport.script(page, vec![Step::Status(503)]);
    }
    let transport = Arc::new(transport);
    let (harvester, metrics) = harvester(transport, &config);
    let mut generator = generator(&config, 10);
    let mut sink = CollectingSink::default();

    let summary = harvester.run(&mut generator, &mut sink).await.unwrap();

    use CircuitState::*;
    assert_eq!(
        metrics.transitions(),
        vec![(Closed, Open), (Open, HalfOpen), (HalfOpen, Closed), (Closed, Complete)]
    );
    assert_eq!(summary.outcome, RunOutcome::Complete);
    assert_eq!(summary.progress.failures, 6);
    assert_eq!(summary.progress.successes, 4);
    assert_eq!(summary.progress.circuit_opens, 1);
    assert_eq!(sink.pages(), (0..10).collect::<Vec<u64>>());
    assert_eq!(harvester.breaker().cooldown(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_healthy_batch_resets_bad_batch_count() {
    let config = FetchConfig {
        retries: 1,
        ..test_config()
    };
    // Batches 0 and 1 fail, batch 2 is healthy, batches 3 and 4 fail
    let mut transport = ScriptedTransport::always_ok();
    for page in [0, 1, 2, 3, 6, 7, 8, 9] {
        transport = transport.script(page, vec![Step::Status(500)]);
    }
    let (harvester, metrics) = harvester(Arc::new(transport), &config);
    let mut generator = generator(&config, 10);
    let mut sink = CollectingSink::default();

    let summary = harvester.run(&mut generator, &mut sink).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Complete);
    assert_eq!(summary.progress.circuit_opens, 0);
    assert_eq!(
        metrics.transitions(),
        vec![(CircuitState::Closed, CircuitState::Complete)]
    );
}
