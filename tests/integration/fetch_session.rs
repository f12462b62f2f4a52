//! Per-request retry, throttle ordering and batch ordering through a FetchSession

use crate::common::{test_config, RecordingMetrics, RecordingThrottle, ScriptedTransport, Step, ThrottleEvent};
use page_harvester::downloader::{ClientErrorPolicy, FetchConfig, FetchSession};
use page_harvester::fetcher::{Batch, TransportError};
use page_harvester::query::AppSearchQuery;
use page_harvester::{ErrorKind, Outcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn session(transport: Arc<ScriptedTransport>, config: &FetchConfig) -> (FetchSession, Arc<RecordingThrottle>, Arc<RecordingMetrics>) {
    let throttle = Arc::new(RecordingThrottle::new(1));
    let metrics = RecordingMetrics::shared();
    let session = FetchSession::new(transport, throttle.clone(), config).with_metrics(metrics.clone());
    (session, throttle, metrics)
}

fn batch(pages: std::ops::Range<u64>) -> Batch {
    let query = AppSearchQuery::new(6018);
    Batch::new(0, pages.map(|page| query.request_for_page(page)).collect())
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_success_backs_off_exponentially() {
    let transport = Arc::new(
        ScriptedTransport::always_ok().script(0, vec![Step::Status(500), Step::Status(500), Step::Ok]),
    );
    let (session, _, metrics) = session(transport.clone(), &test_config());

    let started = Instant::now();
    let result = session.run(batch(0..1)).await.unwrap();

    let outcome = &result.outcomes()[0];
    assert!(outcome.is_success());
    assert_eq!(outcome.attempts(), 3);
    assert_eq!(transport.calls_for(0), 3);
    assert_eq!(
        metrics.retries(),
        vec![(1, Duration::from_secs(2)), (2, Duration::from_secs(4))]
    );
    assert!(started.elapsed() >= Duration::from_secs(6));
    assert_eq!(metrics.attempted(), 3);
    assert_eq!(metrics.succeeded(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_yield_server_failure() {
    let transport = Arc::new(ScriptedTransport::new(Step::Status(500)));
    let config = FetchConfig {
        retries: 2,
        ..test_config()
    };
    let (session, _, metrics) = session(transport.clone(), &config);

    let result = session.run(batch(0..1)).await.unwrap();

    let failure = result.outcomes()[0].failure().expect("request should fail");
    assert_eq!(failure.kind, ErrorKind::Server);
    assert_eq!(failure.status, Some(500));
    assert_eq!(failure.attempts, 2);
    assert_eq!(transport.calls_for(0), 2);
    assert_eq!(metrics.failed(ErrorKind::Server), 1);
    // No sleep after the final attempt
    assert_eq!(metrics.retries().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_throttle_released_and_delayed_every_attempt() {
    let transport = Arc::new(ScriptedTransport::always_ok().script(0, vec![Step::Status(503)]));
    let (session, throttle, _) = session(transport, &test_config());

    let outcome = session.fetch(&AppSearchQuery::new(6018).request_for_page(0)).await;

    assert!(outcome.is_success());
    assert_eq!(
        throttle.events(),
        vec![
            ThrottleEvent::Acquire,
            ThrottleEvent::Release,
            ThrottleEvent::Delay,
            ThrottleEvent::Acquire,
            ThrottleEvent::Release,
            ThrottleEvent::Delay,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_attempts_are_paced_like_successful_ones() {
    let transport = Arc::new(
        ScriptedTransport::always_ok().script(0, vec![Step::Status(500), Step::Status(500), Step::Ok]),
    );
    let (session, throttle, _) = session(transport, &test_config());

    let outcome = session.fetch(&AppSearchQuery::new(6018).request_for_page(0)).await;

    assert!(outcome.is_success());
    assert_eq!(throttle.count(ThrottleEvent::Acquire), 3);
    assert_eq!(throttle.count(ThrottleEvent::Release), 3);
    assert_eq!(throttle.count(ThrottleEvent::Delay), 3);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_body_is_data_failure() {
    let transport = Arc::new(ScriptedTransport::new(Step::Malformed));
    let config = FetchConfig {
        retries: 1,
        ..test_config()
    };
    let (session, throttle, metrics) = session(transport, &config);

    let outcome = session.fetch(&AppSearchQuery::new(6018).request_for_page(0)).await;

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::Data);
    assert_eq!(failure.status, Some(200));
    assert!(failure.message.contains("invalid JSON"));
    assert_eq!(throttle.count(ThrottleEvent::Delay), 1);
    assert_eq!(metrics.failed(ErrorKind::Data), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transport_errors_are_data_failures() {
    let transport = Arc::new(ScriptedTransport::new(Step::Fail(TransportError::Connect(
        "connection refused".to_string(),
    ))));
    let config = FetchConfig {
        retries: 2,
        ..test_config()
    };
    let (session, _, _) = session(transport, &config);

    let outcome = session.fetch(&AppSearchQuery::new(6018).request_for_page(0)).await;

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::Data);
    assert_eq!(failure.status, None);
    assert_eq!(failure.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failed_attempt() {
    let transport = Arc::new(ScriptedTransport::always_ok().script(0, vec![Step::Hang]));
    let config = FetchConfig {
        timeout_secs: 5,
        ..test_config()
    };
    let (session, _, metrics) = session(transport.clone(), &config);

    let outcome = session.fetch(&AppSearchQuery::new(6018).request_for_page(0)).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.attempts(), 2);
    assert_eq!(metrics.retries().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_policy_never_stops_after_first_attempt() {
    let transport = Arc::new(ScriptedTransport::new(Step::Status(404)));
    let config = FetchConfig {
        client_error_policy: ClientErrorPolicy::Never,
        ..test_config()
    };
    let (session, _, _) = session(transport.clone(), &config);

    let outcome = session.fetch(&AppSearchQuery::new(6018).request_for_page(0)).await;

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::Client);
    assert_eq!(failure.attempts, 1);
    assert_eq!(transport.calls_for(0), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_only_policy_retries_429_but_not_404() {
    let transport = Arc::new(
        ScriptedTransport::always_ok()
            .script(0, vec![Step::Status(429)])
            .script(1, vec![Step::Status(404)]),
    );
    let config = FetchConfig {
        client_error_policy: ClientErrorPolicy::RateLimitOnly,
        ..test_config()
    };
    let (session, _, _) = session(transport, &config);

    let result = session.run(batch(0..2)).await.unwrap();

    assert!(result.outcomes()[0].is_success());
    assert_eq!(result.outcomes()[0].attempts(), 2);
    let failure = result.outcomes()[1].failure().unwrap();
    assert_eq!(failure.status, Some(404));
    assert_eq!(failure.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_result_keeps_request_order() {
    // Page 0 needs two retries and finishes last
    let transport = Arc::new(
        ScriptedTransport::always_ok().script(0, vec![Step::Status(502), Step::Status(502)]),
    );
    let (session, _, metrics) = session(transport.clone(), &test_config());

    let result = session.run(batch(0..5)).await.unwrap();

    assert_eq!(result.len(), 5);
    assert_eq!(result.successes(), 5);
    for (index, (request, outcome)) in result.iter().enumerate() {
        assert_eq!(request.page(), index as u64);
        let payload = outcome.payload().unwrap();
        assert_eq!(payload["page"], index as u64);
    }
    assert_eq!(transport.calls().last(), Some(&0));
    assert_eq!(metrics.batches.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_request_does_not_fail_batch() {
    let transport = Arc::new(ScriptedTransport::always_ok().script(2, vec![Step::Status(500); 3]));
    let (session, _, _) = session(transport, &test_config());

    let result = session.run(batch(0..4)).await.unwrap();

    assert_eq!(result.successes(), 3);
    assert_eq!(result.failures(), 1);
    assert_eq!(result.failed_pages(), vec![2]);
    assert_eq!(result.failures_of(ErrorKind::Server), 1);
    assert!(matches!(result.outcomes()[2], Outcome::Failure(_)));
}
