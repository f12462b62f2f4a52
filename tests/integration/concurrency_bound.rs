//! The admission gate bounds in-flight requests across batches

use crate::common::{test_config, RecordingThrottle, ScriptedTransport};
use page_harvester::downloader::{FetchConfig, FetchSession, WindowThrottle};
use page_harvester::fetcher::Batch;
use page_harvester::query::AppSearchQuery;
use std::sync::Arc;
use std::time::Duration;

fn batch(id: u64, pages: std::ops::Range<u64>) -> Batch {
    let query = AppSearchQuery::new(6018);
    Batch::new(id, pages.map(|page| query.request_for_page(page)).collect())
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_never_exceeds_ceiling() {
    let transport = Arc::new(ScriptedTransport::always_ok().with_latency(Duration::from_millis(10)));
    let config = FetchConfig {
        max_concurrency: 4,
        ..test_config()
    };
    let session = FetchSession::new(transport.clone(), Arc::new(RecordingThrottle::new(1)), &config);

    let result = session.run(batch(0, 0..20)).await.unwrap();

    assert_eq!(result.successes(), 20);
    assert_eq!(transport.peak(), 4);
    assert_eq!(session.gate().peak(), 4);
    assert_eq!(session.gate().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ceiling_is_shared_between_concurrent_batches() {
    let transport = Arc::new(ScriptedTransport::always_ok().with_latency(Duration::from_millis(10)));
    let config = FetchConfig {
        max_concurrency: 3,
        ..test_config()
    };
    let session = FetchSession::new(transport.clone(), Arc::new(RecordingThrottle::new(1)), &config);

    let (a, b) = tokio::join!(session.run(batch(0, 0..10)), session.run(batch(1, 10..20)));

    assert_eq!(a.unwrap().successes(), 10);
    assert_eq!(b.unwrap().successes(), 10);
    assert!(transport.peak() <= 3);
    assert_eq!(session.gate().peak(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_ceiling_widens_to_throttle_rate() {
    let transport = Arc::new(ScriptedTransport::always_ok().with_latency(Duration::from_millis(10)));
    let config = FetchConfig {
        max_concurrency: 2,
        ..test_config()
    };
    let session = FetchSession::new(transport.clone(), Arc::new(RecordingThrottle::new(6)), &config);

    session.run(batch(0, 0..12)).await.unwrap();

    assert_eq!(session.gate().capacity(), 6);
    assert!(transport.peak() <= 6);
}

#[tokio::test(start_paused = true)]
async fn test_window_throttle_spreads_requests_over_windows() {
    let transport = Arc::new(ScriptedTransport::always_ok());
    let config = FetchConfig {
        max_concurrency: 10,
        throttle_max_rate: 5,
        throttle_window_ms: 1000,
        throttle_delay_ms: 0,
        ..test_config()
    };
    let throttle = Arc::new(WindowThrottle::from_config(&config));
    let session = FetchSession::new(transport, throttle, &config);

    let started = tokio::time::Instant::now();
    let result = session.run(batch(0, 0..15)).await.unwrap();

    assert_eq!(result.successes(), 15);
    // Five per window: the last five wait for two windows to roll over
    assert!(started.elapsed() >= Duration::from_secs(2));
}
