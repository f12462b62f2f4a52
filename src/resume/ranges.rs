//! Compact set of page indices
//!
//! Consecutive pages collapse into one inclusive `[start, end]` span, so a run
//! that fails page after page stores a single entry instead of one per page.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Set of pages stored as disjoint, non-adjacent inclusive spans
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[u64; 2]>", into = "Vec<[u64; 2]>")]
pub struct PageRanges {
    spans: BTreeMap<u64, u64>,
}

impl PageRanges {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Span containing `page`, as `(start, end)`
    fn span_of(&self, page: u64) -> Option<(u64, u64)> {
        self.spans
            .range(..=page)
            .next_back()
            .filter(|&(_, &end)| end >= page)
            .map(|(&start, &end)| (start, end))
    }

    /// Whether `page` is in the set
    pub fn contains(&self, page: u64) -> bool {
        self.span_of(page).is_some()
    }

    /// Add `page`, merging with neighbouring spans.
    pub fn insert(&mut self, page: u64) {
        if self.contains(page) {
            return;
        }

        let left = self
            .spans
            .range(..page)
            .next_back()
            .filter(|&(_, &end)| end.checked_add(1) == Some(page))
            .map(|(&start, _)| start);
        let right = page
            .checked_add(1)
            .and_then(|next| self.spans.get(&next).map(|&end| (next, end)));

        match (left, right) {
            (Some(start), Some((next, end))) => {
                self.spans.remove(&next);
                self.spans.insert(start, end);
            }
            (Some(start), None) => {
                self.spans.insert(start, page);
            }
            (None, Some((next, end))) => {
                self.spans.remove(&next);
                self.spans.insert(page, end);
            }
            (None, None) => {
                self.spans.insert(page, page);
            }
        }
    }

    /// Remove `page`, splitting its span if needed.
    pub fn remove(&mut self, page: u64) {
        let Some((start, end)) = self.span_of(page) else {
            return;
        };
        self.spans.remove(&start);
        if start < page {
            self.spans.insert(start, page - 1);
        }
        if page < end {
            self.spans.insert(page + 1, end);
        }
    }

    /// Number of pages in the set
    pub fn len(&self) -> u64 {
        self.spans
            .iter()
            .fold(0u64, |total, (&start, &end)| total.saturating_add(end - start).saturating_add(1))
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Number of stored spans
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Pages in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.spans.iter().flat_map(|(&start, &end)| start..=end)
    }
}

impl TryFrom<Vec<[u64; 2]>> for PageRanges {
    type Error = String;

    fn try_from(mut raw: Vec<[u64; 2]>) -> Result<Self, Self::Error> {
        raw.sort_unstable();
        let mut spans = BTreeMap::new();
        let mut current: Option<(u64, u64)> = None;

        for [start, end] in raw {
            if start > end {
                return Err(format!("page span [{start}, {end}] is reversed"));
            }
            current = match current {
                Some((open, close)) if start <= close.saturating_add(1) => Some((open, close.max(end))),
                Some((open, close)) => {
                    spans.insert(open, close);
                    Some((start, end))
                }
                None => Some((start, end)),
            };
        }
        if let Some((open, close)) = current {
            spans.insert(open, close);
        }

        Ok(Self { spans })
    }
}

impl From<PageRanges> for Vec<[u64; 2]> {
    fn from(ranges: PageRanges) -> Self {
        ranges.spans.into_iter().map(|(start, end)| [start, end]).collect()
    }
}
