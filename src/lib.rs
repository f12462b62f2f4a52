//! # Page Harvester Library
//!
//! Bulk acquisition of paginated records from rate-limited, unreliable upstream
//! APIs. Many page requests are issued concurrently while the provider's request
//! rate and concurrency ceiling are respected, transient failures are retried
//! without losing or duplicating pages, and a run stops cleanly when its budget
//! is exhausted or the upstream stays unhealthy.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use page_harvester::downloader::{FetchConfig, FetchSession, Harvester, WindowThrottle};
//! use page_harvester::fetcher::http::ReqwestTransport;
//! use page_harvester::fetcher::pagination::BatchGenerator;
//! use page_harvester::output::NullSink;
//! use page_harvester::query::AppSearchQuery;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FetchConfig::default();
//! let transport = Arc::new(ReqwestTransport::new(&config)?);
//! let throttle = Arc::new(WindowThrottle::from_config(&config));
//! let session = FetchSession::new(transport, throttle, &config);
//!
//! let mut generator = BatchGenerator::new(AppSearchQuery::new(6018), 0, 100, 1_000);
//! let harvester = Harvester::new(session, &config);
//! let summary = harvester.run(&mut generator, &mut NullSink).await?;
//! println!("finished with {:?}", summary.outcome);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`query`] - Upstream query descriptor and header provider interface
//! - [`fetcher`] - Transport boundary, error taxonomy, pagination and aggregation
//! - [`downloader`] - Throttle, admission gate, circuit breaker, fetch session and driving loop
//! - [`resume`] - Bookmark persistence for restartable runs
//! - [`output`] - Batch sinks
//! - [`metrics`] - Metric sinks and Prometheus exporter
//! - [`shutdown`] - Cancellation signal

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// CLI command implementations
pub mod cli;

/// Fetch orchestration
pub mod downloader;

/// Transport, pagination and aggregation
pub mod fetcher;

/// Metric sinks
pub mod metrics;

/// Batch sinks
pub mod output;

/// Upstream query descriptors
pub mod query;

/// Resume capability for harvest runs
pub mod resume;

/// Cancellation coordination shared across tasks
pub mod shutdown;

pub use fetcher::{ErrorKind, Failure, Outcome};
pub use query::AppSearchQuery;

/// Decoded response body. The engine treats it opaquely.
pub type Payload = serde_json::Value;

/// Immutable descriptor of one page request.
///
/// Identity is `(endpoint, params)`. Headers and the page index ride along but
/// do not take part in equality, so two requests for the same page with
/// different rotated headers still correlate to the same outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    endpoint: String,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    page: u64,
}

impl Request {
    /// Create a request for `page` against `endpoint` with no parameters.
    pub fn new(endpoint: impl Into<String>, page: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Vec::new(),
            headers: Vec::new(),
            page,
        }
    }

    /// Append a query parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    /// Replace the header set.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Target endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Query parameters in insertion order
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Request headers
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Logical page index this request covers
    pub fn page(&self) -> u64 {
        self.page
    }

    /// Look up a query parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint && self.params == other.params
    }
}

impl Eq for Request {}

impl Hash for Request {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.endpoint.hash(state);
        self.params.hash(state);
    }
}
