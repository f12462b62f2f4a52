//! Batch generation properties

use page_harvester::fetcher::BatchGenerator;
use page_harvester::query::{AppSearchQuery, HeaderProvider, StaticHeaders};
use page_harvester::resume::Bookmark;
use std::collections::HashSet;
use std::sync::Arc;

fn generator(start: u64, batch_size: usize, budget: u64) -> BatchGenerator {
    BatchGenerator::new(AppSearchQuery::new(6018), start, batch_size, budget)
}

#[test]
fn test_total_requests_never_exceed_budget() {
    for (batch_size, budget) in [(1, 0), (1, 7), (3, 10), (10, 3), (4, 8), (100, 250)] {
        let total: usize = generator(0, batch_size, budget).map(|b| b.len()).sum();
        assert_eq!(total as u64, budget, "batch_size={batch_size} budget={budget}");
    }
}

#[test]
fn test_batches_are_full_except_last() {
    let sizes: Vec<usize> = generator(0, 4, 10).map(|b| b.len()).collect();
    assert_eq!(sizes, vec![4, 4, 2]);
}

#[test]
fn test_pages_are_consecutive_and_never_repeat() {
    let mut seen = HashSet::new();
    let mut expected = 5;
    for batch in generator(5, 3, 20) {
        for page in batch.pages() {
            assert_eq!(page, expected);
            assert!(seen.insert(page));
            expected += 1;
        }
    }
    assert_eq!(seen.len(), 20);
}

#[test]
fn test_batch_ids_increase() {
    let ids: Vec<u64> = generator(0, 2, 6).map(|b| b.id()).collect();
    assert_eq!(ids, vec![0, 1, 2]);
}

#[test]
fn test_offsets_follow_page_and_limit() {
    let query = AppSearchQuery::new(6018).with_limit(50);
    let mut generator = BatchGenerator::new(query, 2, 2, 2);
    let batch = generator.next_batch().unwrap();

    let offsets: Vec<&str> = batch.requests().iter().map(|r| r.param("offset").unwrap()).collect();
    assert_eq!(offsets, vec!["100", "150"]);
    assert_eq!(batch.requests()[0].param("limit"), Some("50"));
    assert_eq!(batch.requests()[0].param("genreId"), Some("6018"));
}

#[test]
fn test_limited_batch_respects_limit_and_budget() {
    let mut generator = generator(0, 10, 12);
    assert_eq!(generator.next_batch_limited(3).unwrap().len(), 3);
    assert_eq!(generator.next_batch().unwrap().len(), 9);
    assert!(generator.next_batch_limited(3).is_none());
    assert!(generator.is_exhausted());
}

#[test]
fn test_restart_from_bookmark_yields_the_rest() {
    let mut first = generator(0, 3, 10);
    first.next_batch().unwrap();
    first.next_batch().unwrap();
    let bookmark = first.bookmark();
    assert_eq!(bookmark, Bookmark::new(6, 6));

    let rest: Vec<u64> = first.flat_map(|b| b.pages()).collect();
    let restarted: Vec<u64> = BatchGenerator::from_bookmark(AppSearchQuery::new(6018), bookmark, 3, 10)
        .flat_map(|b| b.pages())
        .collect();
    assert_eq!(restarted, rest);
    assert_eq!(restarted, vec![6, 7, 8, 9]);
}

#[test]
fn test_unbounded_budget_has_no_remaining_budget() {
    let generator = generator(0, 10, u64::MAX);
    assert_eq!(generator.remaining_budget(), None);
    assert_eq!(generator.remaining(), u64::MAX);
}

#[test]
fn test_page_range_end_exhausts_generator() {
    let query = AppSearchQuery::new(6018).with_limit(1);
    let mut generator = BatchGenerator::new(query, u64::MAX - 1, 4, 10);

    let batch = generator.next_batch().unwrap();
    assert_eq!(batch.pages(), vec![u64::MAX - 1]);
    assert_eq!(batch.requests()[0].param("offset"), Some((u64::MAX - 1).to_string().as_str()));
    assert!(generator.is_exhausted());
    assert!(generator.next_batch().is_none());
    assert_eq!(generator.issued(), 1);
    assert_eq!(generator.bookmark().next_page, u64::MAX);
}

#[test]
fn test_unrepresentable_offset_yields_no_batch() {
    let query = AppSearchQuery::new(6018);
    let last = query.last_page();

    let sizes: Vec<usize> = BatchGenerator::new(query.clone(), last - 2, 2, 10).map(|b| b.len()).collect();
    assert_eq!(sizes, vec![2, 1]);

    let mut generator = BatchGenerator::new(query, last + 1, 2, 10);
    assert!(generator.is_exhausted());
    assert!(generator.next_batch().is_none());
    assert_eq!(generator.issued(), 0);
}

#[test]
fn test_offsets_near_range_end_stay_distinct() {
    let query = AppSearchQuery::new(6018).with_limit(200);
    let last = query.last_page();
    let offsets: HashSet<String> = BatchGenerator::new(query, last - 3, 8, 100)
        .flat_map(|batch| batch.into_requests())
        .map(|request| request.param("offset").unwrap().to_string())
        .collect();
    assert_eq!(offsets.len(), 4);
}

#[test]
fn test_header_provider_rotates_per_request() {
    let headers = Arc::new(StaticHeaders::rotating(vec![
        vec![("User-Agent".to_string(), "a".to_string())],
        vec![("User-Agent".to_string(), "b".to_string())],
    ]));
    let provider: Arc<dyn HeaderProvider> = headers;
    let mut generator = generator(0, 3, 3).with_headers(provider);

    let batch = generator.next_batch().unwrap();
    let agents: Vec<&str> = batch
        .requests()
        .iter()
        .map(|r| r.headers()[0].1.as_str())
        .collect();
    assert_eq!(agents, vec!["a", "b", "a"]);
}
