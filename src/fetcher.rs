//! Bounded-concurrency multi-source fetch with wave-based quota allocation
//!
//! One fetch round splits the requested count across the (shuffled) sources,
//! runs a semaphore-bounded task per source, and merges the results with
//! post-id and asset-URL dedup. A second wave tops up any shortfall, asking
//! one post at a time from sources that got nothing in the first wave before
//! returning to the rest. Per-source failures exclude that source from the
//! round and never abort it; an empty round is a valid outcome.

use crate::config::FetchConfig;
use crate::filter::PostFilterEngine;
use crate::source::SourceProvider;
use crate::types::{AcceptedPost, SortMode, TimeWindow};
use futures::future::join_all;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

/// One fetch round's parameters
#[derive(Clone, Debug)]
pub struct FetchRequest {
    /// Source names to fetch from (already validated by the caller)
    pub sources: Vec<String>,
    /// Optional search query; a listing fetch is used when absent
    pub query: Option<String>,
    /// Listing sort mode
    pub sort: SortMode,
    /// Time window for top-sorted listings
    pub window: Option<TimeWindow>,
    /// Total number of posts wanted from this round
    pub count: usize,
}

/// Multi-source fetcher
pub struct ConcurrentFetcher {
    provider: Arc<dyn SourceProvider>,
    filter: Arc<PostFilterEngine>,
    config: FetchConfig,
}

impl ConcurrentFetcher {
    /// Create a fetcher over a provider and filter
    pub fn new(
        provider: Arc<dyn SourceProvider>,
        filter: Arc<PostFilterEngine>,
        config: FetchConfig,
    ) -> Self {
        Self {
            provider,
            filter,
            config,
        }
    }

    /// Run one fetch round
    ///
    /// `processed` is a snapshot of already-delivered asset URLs; candidates
    /// matching it are filtered out. The result is at most `request.count`
    /// accepted posts, deduplicated by post id and asset URL.
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        processed: Arc<HashSet<String>>,
    ) -> Vec<AcceptedPost> {
        if request.sources.is_empty() || request.count == 0 {
            return vec![];
        }

        let mut sources = request.sources.clone();
        sources.shuffle(&mut rand::thread_rng());

        let quotas = allocate_quotas(request.count, sources.len());
        info!(
            sources = sources.len(),
            count = request.count,
            "starting fetch round"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_fetches));
        let seen_ids = Arc::new(Mutex::new(HashSet::new()));

        // Wave 1: quota-weighted concurrent fetch
        let handles: Vec<_> = sources
            .iter()
            .zip(quotas.iter())
            .filter(|(_, &quota)| quota > 0)
            .map(|(source, &quota)| {
                let task = SourceTask {
                    provider: self.provider.clone(),
                    filter: self.filter.clone(),
                    semaphore: semaphore.clone(),
                    seen_ids: seen_ids.clone(),
                    processed: processed.clone(),
                    source: source.clone(),
                    query: request.query.clone(),
                    sort: request.sort,
                    window: request.window,
                    listing_limit: self.config.listing_limit,
                    quota,
                };
                tokio::spawn(task.run())
            })
            .collect();

        let mut combined = Vec::new();
        let mut seen_urls = HashSet::new();
        for result in join_all(handles).await {
            match result {
                Ok(posts) => merge_unique(&mut combined, &mut seen_urls, posts),
                Err(e) => error!(error = %e, "source fetch task panicked"),
            }
        }

        // Wave 2: sequential top-up, zero-allocation sources first
        let shortfall = request.count.saturating_sub(combined.len());
        if shortfall > 0 {
            let mut ordered: Vec<&String> = sources
                .iter()
                .zip(quotas.iter())
                .filter(|(_, &q)| q == 0)
                .map(|(s, _)| s)
                .collect();
            ordered.extend(
                sources
                    .iter()
                    .zip(quotas.iter())
                    .filter(|(_, &q)| q > 0)
                    .map(|(s, _)| s),
            );

            for source in ordered {
                if combined.len() >= request.count {
                    break;
                }
                let task = SourceTask {
                    provider: self.provider.clone(),
                    filter: self.filter.clone(),
                    semaphore: semaphore.clone(),
                    seen_ids: seen_ids.clone(),
                    processed: processed.clone(),
                    source: source.clone(),
                    query: request.query.clone(),
                    sort: request.sort,
                    window: request.window,
                    listing_limit: self.config.listing_limit,
                    quota: 1,
                };
                merge_unique(&mut combined, &mut seen_urls, task.run().await);
            }
        }

        combined.truncate(request.count);
        info!(returned = combined.len(), "fetch round complete");
        combined
    }
}

/// One per-source fetch task
struct SourceTask {
    provider: Arc<dyn SourceProvider>,
    filter: Arc<PostFilterEngine>,
    semaphore: Arc<Semaphore>,
    seen_ids: Arc<Mutex<HashSet<String>>>,
    processed: Arc<HashSet<String>>,
    source: String,
    query: Option<String>,
    sort: SortMode,
    window: Option<TimeWindow>,
    listing_limit: usize,
    quota: usize,
}

impl SourceTask {
    /// Validate, fetch, filter to quota, and dedup by post id
    async fn run(self) -> Vec<AcceptedPost> {
        let _permit = match self.semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return vec![],
        };

        if let Err(e) = self.provider.validate(&self.source).await {
            warn!(source = %self.source, error = %e, "skipping invalid source");
            return vec![];
        }

        let posts = match &self.query {
            Some(query) => {
                self.provider
                    .search(&self.source, query, self.sort, self.window, self.listing_limit)
                    .await
            }
            None => {
                self.provider
                    .fetch_sorted(&self.source, self.sort, self.window, self.listing_limit)
                    .await
            }
        };
        let posts = match posts {
            Ok(posts) => posts,
            Err(e) => {
                warn!(source = %self.source, error = %e, "fetch from source failed");
                return vec![];
            }
        };
        if posts.is_empty() {
            info!(source = %self.source, "no results from source");
            return vec![];
        }

        let accepted = self
            .filter
            .filter(posts, self.processed.as_ref(), self.quota)
            .await;

        // Post-id dedup across all tasks in the round
        let mut seen = self.seen_ids.lock().await;
        let unique: Vec<AcceptedPost> = accepted
            .into_iter()
            .filter(|post| seen.insert(post.candidate.id.clone()))
            .collect();
        info!(source = %self.source, unique = unique.len(), "source fetch complete");
        unique
    }
}

/// Split `total` across `n` sources: base share each, first `remainder` get one extra
///
/// The sum of the returned quotas always equals `total`; shares differ by at
/// most one.
fn allocate_quotas(total: usize, n: usize) -> Vec<usize> {
    if n == 0 {
        return vec![];
    }
    let base = total / n;
    let remainder = total % n;
    (0..n)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

/// Append posts whose asset URL has not been seen in this round
fn merge_unique(
    combined: &mut Vec<AcceptedPost>,
    seen_urls: &mut HashSet<String>,
    posts: Vec<AcceptedPost>,
) {
    for post in posts {
        if seen_urls.insert(post.candidate.url.clone()) {
            combined.push(post);
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadlist::DeadLinkList;
    use crate::error::{Error, Result, SourceError};
    use crate::types::Candidate;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use tokio::sync::broadcast;

    struct MapProvider {
        by_source: HashMap<String, Vec<Candidate>>,
        invalid: HashSet<String>,
    }

    #[async_trait]
    impl SourceProvider for MapProvider {
        async fn validate(&self, source: &str) -> Result<()> {
            if self.invalid.contains(source) {
                return Err(Error::Source(SourceError::NotFound {
                    name: source.to_string(),
                }));
            }
            Ok(())
        }

        async fn fetch_sorted(
            &self,
            source: &str,
            _sort: SortMode,
            _window: Option<TimeWindow>,
            _limit: usize,
        ) -> Result<Vec<Candidate>> {
            Ok(self.by_source.get(source).cloned().unwrap_or_default())
        }

        async fn search(
            &self,
            source: &str,
            _query: &str,
            sort: SortMode,
            window: Option<TimeWindow>,
            limit: usize,
        ) -> Result<Vec<Candidate>> {
            self.fetch_sorted(source, sort, window, limit).await
        }
    }

    fn candidate(id: &str, url: &str) -> Candidate {
        Candidate {
            id: id.to_string(),
            source: "s".to_string(),
            author: None,
            title: "t".to_string(),
            flair: None,
            score: 1,
            url: url.to_string(),
            created_at: Utc::now(),
            top_comment: None,
            gallery: None,
            native_video: None,
        }
    }

    fn fetcher(by_source: HashMap<String, Vec<Candidate>>, invalid: &[&str]) -> ConcurrentFetcher {
        let (events, _) = broadcast::channel(64);
        let filter = Arc::new(PostFilterEngine::new(
            None,
            Arc::new(DeadLinkList::in_memory()),
            events,
        ));
        ConcurrentFetcher::new(
            Arc::new(MapProvider {
                by_source,
                invalid: invalid.iter().map(|s| s.to_string()).collect(),
            }),
            filter,
            FetchConfig::default(),
        )
    }

    fn request(sources: &[&str], count: usize) -> FetchRequest {
        FetchRequest {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            query: None,
            sort: SortMode::Hot,
            window: None,
            count,
        }
    }

    #[test]
    fn quota_allocation_conserves_total() {
        for (total, n) in [(4, 2), (5, 3), (1, 4), (10, 1), (0, 3), (7, 7)] {
            let quotas = allocate_quotas(total, n);
            assert_eq!(quotas.len(), n);
            assert_eq!(quotas.iter().sum::<usize>(), total, "total={total} n={n}");
            if let (Some(max), Some(min)) = (quotas.iter().max(), quotas.iter().min()) {
                assert!(max - min <= 1, "shares must differ by at most one");
            }
        }
        assert!(allocate_quotas(5, 0).is_empty());
    }

    #[tokio::test]
    async fn full_round_meets_count() {
        let mut by_source = HashMap::new();
        by_source.insert(
            "a".to_string(),
            vec![
                candidate("a1", "https://i.redd.it/a1.jpg"),
                candidate("a2", "https://i.redd.it/a2.jpg"),
            ],
        );
        by_source.insert(
            "b".to_string(),
            vec![
                candidate("b1", "https://i.redd.it/b1.jpg"),
                candidate("b2", "https://i.redd.it/b2.jpg"),
            ],
        );

        let result = fetcher(by_source, &[])
            .fetch(&request(&["a", "b"], 4), Arc::new(HashSet::new()))
            .await;
        assert_eq!(result.len(), 4);
    }

    #[tokio::test]
    async fn duplicate_asset_urls_collapse() {
        let shared = "https://i.redd.it/same.jpg";
        let mut by_source = HashMap::new();
        by_source.insert("a".to_string(), vec![candidate("a1", shared)]);
        by_source.insert("b".to_string(), vec![candidate("b1", shared)]);

        let result = fetcher(by_source, &[])
            .fetch(&request(&["a", "b"], 4), Arc::new(HashSet::new()))
            .await;
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn invalid_source_is_isolated() {
        let mut by_source = HashMap::new();
        by_source.insert(
            "good".to_string(),
            vec![candidate("g1", "https://i.redd.it/g1.jpg")],
        );

        let result = fetcher(by_source, &["bad"])
            .fetch(&request(&["good", "bad"], 2), Arc::new(HashSet::new()))
            .await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].candidate.id, "g1");
    }

    #[tokio::test]
    async fn second_wave_tops_up_shortfall() {
        // Three sources, count 2: wave 1 gives one source zero quota. Whichever
        // source that is, the second wave must recover the missing post.
        let mut by_source = HashMap::new();
        by_source.insert(
            "a".to_string(),
            vec![candidate("a1", "https://i.redd.it/a1.jpg")],
        );
        by_source.insert("b".to_string(), vec![]);
        by_source.insert(
            "c".to_string(),
            vec![candidate("c1", "https://i.redd.it/c1.jpg")],
        );

        for _ in 0..8 {
            let result = fetcher(by_source.clone(), &[])
                .fetch(&request(&["a", "b", "c"], 2), Arc::new(HashSet::new()))
                .await;
            assert_eq!(result.len(), 2, "shortfall must be covered by wave 2");
        }
    }

    #[tokio::test]
    async fn empty_round_is_ok() {
        let result = fetcher(HashMap::new(), &[])
            .fetch(&request(&["a", "b"], 3), Arc::new(HashSet::new()))
            .await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn processed_urls_are_excluded() {
        let mut by_source = HashMap::new();
        by_source.insert(
            "a".to_string(),
            vec![
                candidate("a1", "https://i.redd.it/old.jpg"),
                candidate("a2", "https://i.redd.it/new.jpg"),
            ],
        );

        let mut processed = HashSet::new();
        processed.insert("https://i.redd.it/old.jpg".to_string());

        let result = fetcher(by_source, &[])
            .fetch(&request(&["a"], 2), Arc::new(processed))
            .await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].candidate.id, "a2");
    }
}
