//! Pagination bookmark
//!
//! A bookmark is the generator cursor captured after a batch was generated.
//! Reconstructing a generator from it continues at `next_page` with the
//! request budget already reduced by `issued`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cursor value a caller persists to restart a harvest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bookmark {
    /// First page not yet generated
    pub next_page: u64,
    /// Requests generated so far, counted against the budget
    pub issued: u64,
}

impl Bookmark {
    /// Create a bookmark.
    pub fn new(next_page: u64, issued: u64) -> Self {
        Self { next_page, issued }
    }

    /// Bookmark for a run that has not generated anything yet.
    pub fn at(start_page: u64) -> Self {
        Self::new(start_page, 0)
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {} ({} issued)", self.next_page, self.issued)
    }
}
