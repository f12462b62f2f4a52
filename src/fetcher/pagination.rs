//! Batch generation over a pagination range
//!
//! [`BatchGenerator`] yields a lazy, finite sequence of [`Batch`]es covering
//! consecutive pages, bounded by a total request budget and a fixed batch size.
//!
//! The cursor advances when a batch is *generated*, never when it is fetched:
//! pagination progress is independent of fetch outcome so a failed page is
//! reported in the batch result instead of being silently re-queued or dropped.
//! Restart is done by constructing a new generator from a saved
//! [`Bookmark`].

use crate::query::{AppSearchQuery, HeaderProvider};
use crate::resume::Bookmark;
use crate::Request;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Ordered group of requests produced by one generation call
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    id: u64,
    requests: Vec<Request>,
}

impl Batch {
    /// Build a batch from already constructed requests.
    pub fn new(id: u64, requests: Vec<Request>) -> Self {
        Self { id, requests }
    }

    /// Sequence number of this batch within its generator
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Requests in page order
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Consume the batch, returning its requests
    pub fn into_requests(self) -> Vec<Request> {
        self.requests
    }

    /// Number of requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the batch holds no requests
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Page indices covered by this batch
    pub fn pages(&self) -> Vec<u64> {
        self.requests.iter().map(Request::page).collect()
    }
}

/// Generates request batches for consecutive pages
pub struct BatchGenerator {
    query: AppSearchQuery,
    headers: Option<Arc<dyn HeaderProvider>>,
    start_page: u64,
    batch_size: usize,
    max_requests: u64,
    current_page: u64,
    issued: u64,
    next_batch_id: u64,
}

impl BatchGenerator {
    /// Create a generator starting at `start_page`.
    ///
    /// # Arguments
    /// * `query` - Query used to build each page request
    /// * `start_page` - First page to request (a bookmark's `next_page` on restart)
    /// * `batch_size` - Maximum requests per batch (clamped to at least 1)
    /// * `max_requests` - Total request budget for this generator
    pub fn new(query: AppSearchQuery, start_page: u64, batch_size: usize, max_requests: u64) -> Self {
        Self {
            query,
            headers: None,
            start_page,
            batch_size: batch_size.max(1),
            max_requests,
            current_page: start_page,
            issued: 0,
            next_batch_id: 0,
        }
    }

    /// Restore a generator from a saved bookmark.
    ///
    /// Both the cursor and the already consumed part of the budget are restored,
    /// so the resumed run issues at most `max_requests - bookmark.issued` more
    /// requests and never re-issues a counted page.
    pub fn from_bookmark(
        query: AppSearchQuery,
        bookmark: Bookmark,
        batch_size: usize,
        max_requests: u64,
    ) -> Self {
        let mut generator = Self::new(query, bookmark.next_page, batch_size, max_requests);
        generator.issued = bookmark.issued;
        generator
    }

    /// Attach a header provider consulted once per generated request.
    pub fn with_headers(mut self, headers: Arc<dyn HeaderProvider>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Next full-size batch, or `None` once the budget is spent.
    pub fn next_batch(&mut self) -> Option<Batch> {
        self.next_batch_limited(self.batch_size)
    }

    /// Next batch holding at most `limit` requests (used for reduced trial batches).
    pub fn next_batch_limited(&mut self, limit: usize) -> Option<Batch> {
        let remaining = self.remaining();
        if remaining == 0 {
            debug!(
                issued = self.issued,
                max_requests = self.max_requests,
                "Request budget exhausted"
            );
            return None;
        }
        let addressable = self.addressable_pages();
        if addressable == 0 {
            debug!(
                next_page = self.current_page,
                last_page = self.query.last_page(),
                "Page range exhausted"
            );
            return None;
        }

        let size = limit.clamp(1, self.batch_size);
        let count = remaining.min(addressable).min(size as u64);
        let first_page = self.current_page;

        let requests: Vec<Request> = (first_page..first_page + count)
            .map(|page| {
                let request = self.query.request_for_page(page);
                match &self.headers {
                    Some(provider) => request.with_headers(provider.next_headers()),
                    None => request,
                }
            })
            .collect();

        let produced = requests.len() as u64;
        self.current_page += produced;
        self.issued = self.issued.saturating_add(produced);

        let id = self.next_batch_id;
        self.next_batch_id += 1;

        debug!(
            batch_id = id,
            first_page = first_page,
            size = produced,
            issued = self.issued,
            "Generated batch"
        );

        Some(Batch::new(id, requests))
    }

    /// Current cursor value, suitable for persisting
    pub fn bookmark(&self) -> Bookmark {
        Bookmark {
            next_page: self.current_page,
            issued: self.issued,
        }
    }

    /// Requests generated so far (including any restored from a bookmark)
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Requests left in the budget
    pub fn remaining(&self) -> u64 {
        self.max_requests.saturating_sub(self.issued)
    }

    /// Requests left in the budget, `None` when the budget is unbounded
    pub fn remaining_budget(&self) -> Option<u64> {
        (self.max_requests != u64::MAX).then(|| self.remaining())
    }

    /// Whether the budget is spent or no further page can be addressed
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0 || self.addressable_pages() == 0
    }

    /// Pages from the cursor up to the query's last addressable page
    fn addressable_pages(&self) -> u64 {
        match self.query.last_page().checked_sub(self.current_page) {
            Some(span) => span + 1,
            None => 0,
        }
    }

    /// Page this generator was constructed with
    pub fn start_page(&self) -> u64 {
        self.start_page
    }

    /// Configured batch size
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Configured total budget
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Query used to build requests
    pub fn query(&self) -> &AppSearchQuery {
        &self.query
    }
}

impl Iterator for BatchGenerator {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}

impl fmt::Debug for BatchGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchGenerator")
            .field("category_id", &self.query.category_id)
            .field("start_page", &self.start_page)
            .field("batch_size", &self.batch_size)
            .field("max_requests", &self.max_requests)
            .field("current_page", &self.current_page)
            .field("issued", &self.issued)
            .finish()
    }
}
