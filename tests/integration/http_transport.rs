//! reqwest transport and a full session against a wiremock upstream

use crate::common::{test_config, RecordingMetrics, RecordingThrottle};
use page_harvester::downloader::{FetchConfig, FetchSession};
use page_harvester::fetcher::http::ReqwestTransport;
use page_harvester::fetcher::{Transport, TransportError};
use page_harvester::query::AppSearchQuery;
use page_harvester::ErrorKind;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn query_for(server: &MockServer) -> AppSearchQuery {
    let address = server.address().to_string();
    AppSearchQuery::new(6018).with_base_url("http", &address)
}

#[tokio::test]
async fn test_transport_sends_query_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("genreId", "6018"))
        .and(query_param("offset", "400"))
        .and(query_param("limit", "200"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resultCount": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new(&FetchConfig::default()).unwrap();
    let response = transport.get(&query_for(&server).request_for_page(2)).await.unwrap();

    assert_eq!(response.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["resultCount"], 1);
}

#[tokio::test]
async fn test_transport_returns_error_statuses_as_responses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new(&FetchConfig::default()).unwrap();
    let response = transport.get(&query_for(&server).request_for_page(0)).await.unwrap();

    assert_eq!(response.status, 503);
    assert!(!response.is_success());
}

#[tokio::test]
async fn test_transport_connect_failure() {
    // Nothing listens once the server is dropped
    let query = {
        let server = MockServer::start().await;
        query_for(&server)
    };

    let transport = ReqwestTransport::new(&FetchConfig::default()).unwrap();
    let err = transport.get(&query.request_for_page(0)).await.unwrap_err();

    assert!(matches!(err, TransportError::Connect(_) | TransportError::Network(_)));
}

#[tokio::test]
async fn test_session_retries_against_flaky_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .mount(&server)
        .await;

    let config = FetchConfig {
        backoff_unit_ms: 10,
        ..test_config()
    };
    let metrics = RecordingMetrics::shared();
    let session = FetchSession::new(
        Arc::new(ReqwestTransport::new(&config).unwrap()),
        Arc::new(RecordingThrottle::new(1)),
        &config,
    )
    .with_metrics(metrics.clone());

    let outcome = session.fetch(&query_for(&server).request_for_page(0)).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.attempts(), 3);
    assert_eq!(metrics.retries().len(), 2);
}

#[tokio::test]
async fn test_session_reports_unauthorized_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let config = FetchConfig {
        retries: 1,
        ..test_config()
    };
    let session = FetchSession::new(
        Arc::new(ReqwestTransport::new(&config).unwrap()),
        Arc::new(RecordingThrottle::new(1)),
        &config,
    );

    let outcome = session.fetch(&query_for(&server).request_for_page(0)).await;

    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::Client);
    assert!(failure.is_unauthorized());
}
