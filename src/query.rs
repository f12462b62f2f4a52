//! App Store search query descriptor
//!
//! Builds the per-page [`Request`] for the upstream search endpoint. The
//! pagination offset is derived from `page * limit`; everything else is fixed
//! for a run.

use crate::Request;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default page size accepted by the search endpoint
pub const DEFAULT_LIMIT: u32 = 200;

/// Source of request headers.
///
/// Header and credential rotation is an external concern; the generator only
/// asks for the next header set when it builds a request.
pub trait HeaderProvider: Send + Sync {
    /// Headers to attach to the next request
    fn next_headers(&self) -> Vec<(String, String)>;
}

/// Rotates through a fixed list of header sets.
#[derive(Debug, Default)]
pub struct StaticHeaders {
    sets: Vec<Vec<(String, String)>>,
    next: AtomicUsize,
}

impl StaticHeaders {
    /// Always hand out the same header set.
    pub fn single(headers: Vec<(String, String)>) -> Self {
        Self::rotating(vec![headers])
    }

    /// Round-robin over several header sets.
    pub fn rotating(sets: Vec<Vec<(String, String)>>) -> Self {
        Self {
            sets,
            next: AtomicUsize::new(0),
        }
    }
}

impl HeaderProvider for StaticHeaders {
    fn next_headers(&self) -> Vec<(String, String)> {
        if self.sets.is_empty() {
            return Vec::new();
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.sets.len();
        self.sets[index].clone()
    }
}

/// Search query for one App Store category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSearchQuery {
    /// Category (genre) identifier
    pub category_id: u32,
    /// URL scheme
    pub scheme: String,
    /// Upstream host
    pub host: String,
    /// Endpoint path
    pub command: String,
    /// Media type filter
    pub media: String,
    /// Search term
    pub term: String,
    /// Storefront country
    pub country: String,
    /// Response language
    pub lang: String,
    /// Explicit content flag
    pub explicit: String,
    /// Records per page
    pub limit: u32,
}

impl AppSearchQuery {
    /// Query with the upstream defaults for `category_id`.
    pub fn new(category_id: u32) -> Self {
        Self {
            category_id,
            scheme: "https".to_string(),
            host: "itunes.apple.com".to_string(),
            command: "search".to_string(),
            media: "software".to_string(),
            term: "app".to_string(),
            country: "us".to_string(),
            lang: "en-us".to_string(),
            explicit: "yes".to_string(),
            limit: DEFAULT_LIMIT,
        }
    }

    /// Point the query at another base URL (scheme://host), used by tests and proxies.
    pub fn with_base_url(mut self, scheme: &str, host: &str) -> Self {
        self.scheme = scheme.to_string();
        self.host = host.to_string();
        self
    }

    /// Override the page size.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Full endpoint URL
    pub fn endpoint(&self) -> String {
        format!("{}://{}/{}", self.scheme, self.host, self.command)
    }

    /// Stable identifier used to name resume state files
    pub fn key(&self) -> String {
        format!("genre-{}-{}-{}", self.category_id, self.country, self.limit)
    }

    /// Pagination offset for `page`, `None` when it does not fit in a `u64`
    pub fn offset(&self, page: u64) -> Option<u64> {
        page.checked_mul(u64::from(self.limit))
    }

    /// Highest page whose offset is representable and whose successor can
    /// still be stored as a cursor.
    pub fn last_page(&self) -> u64 {
        let last_cursor = u64::MAX - 1;
        match u64::from(self.limit) {
            0 => last_cursor,
            limit => (u64::MAX / limit).min(last_cursor),
        }
    }

    /// Build the request for `page`.
    ///
    /// `page` must not exceed [`last_page`](Self::last_page).
    pub fn request_for_page(&self, page: u64) -> Request {
        debug_assert!(page <= self.last_page(), "page {page} has no representable offset");
        let offset = self.offset(page).unwrap_or(u64::MAX);
        Request::new(self.endpoint(), page)
            .with_param("media", &self.media)
            .with_param("genreId", self.category_id)
            .with_param("term", &self.term)
            .with_param("country", &self.country)
            .with_param("lang", &self.lang)
            .with_param("explicit", &self.explicit)
            .with_param("limit", self.limit)
            .with_param("offset", offset)
    }
}
