//! Pipeline orchestrator
//!
//! Wires provider, filter, fetcher, resolver, compressor, and uploader into
//! one run: fetch a batch, acquire and deliver it, and retry with exponential
//! backoff while the delivery quota is unmet. The run ends in one of three
//! states: quota satisfied, retry budget exhausted, or no valid sources.

use crate::acquire::AssetAcquirer;
use crate::compress::SizeCompressor;
use crate::config::Config;
use crate::deadlist::DeadLinkList;
use crate::fetcher::{ConcurrentFetcher, FetchRequest};
use crate::ffmpeg::Ffmpeg;
use crate::filter::PostFilterEngine;
use crate::resolver::{MediaLinkResolver, YtDlp};
use crate::retry::{add_jitter, next_delay};
use crate::source::ProviderHandle;
use crate::types::{
    Event, MediaKind, PipelineOutcome, PipelineState, ProcessedUrlSet, SortMode, TimeWindow,
};
use crate::upload::{MediaSender, Uploader};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Broadcast channel capacity for pipeline events
const EVENT_CAPACITY: usize = 64;

/// One run's worth of input
#[derive(Clone, Debug)]
pub struct PipelineRequest {
    /// Source names to pull from
    pub sources: Vec<String>,
    /// Optional search query; listings are used when absent
    pub query: Option<String>,
    /// Listing sort mode
    pub sort: SortMode,
    /// Time window for top-sorted listings and searches
    pub window: Option<TimeWindow>,
    /// Restrict candidates to one media type
    pub media_kind: Option<MediaKind>,
    /// Number of assets to deliver
    pub count: usize,
}

/// The end-to-end media pipeline
///
/// Holds only configuration and the injected collaborators; per-run state
/// (dedup cache, backoff delay, delivered posts) lives inside [`run`] so a
/// pipeline can serve sequential runs.
///
/// [`run`]: MediaPipeline::run
pub struct MediaPipeline {
    config: Config,
    provider: ProviderHandle,
    sender: Arc<dyn MediaSender>,
    events: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl MediaPipeline {
    /// Create a pipeline from config and injected collaborators
    pub fn new(config: Config, provider: ProviderHandle, sender: Arc<dyn MediaSender>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            provider,
            sender,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to pipeline events
    ///
    /// Slow subscribers may observe [`broadcast::error::RecvError::Lagged`];
    /// events are informational and safe to miss.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Token that cancels in-flight backoff waits and stops the run early
    ///
    /// Cancellation is observed between stages; a stage already in flight
    /// finishes first.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute one run
    ///
    /// The only hard error is provider initialization failure; everything
    /// downstream degrades per source or per candidate and is reflected in the
    /// returned [`PipelineOutcome`].
    pub async fn run(&self, request: PipelineRequest) -> crate::error::Result<PipelineOutcome> {
        let provider = self.provider.get().await?;

        let dead_links = Arc::new(match &self.config.dead_link_path {
            Some(path) => DeadLinkList::load(path.clone()).await,
            None => DeadLinkList::in_memory(),
        });

        let mut valid_sources = Vec::new();
        for source in &request.sources {
            match provider.validate(source).await {
                Ok(()) => valid_sources.push(source.clone()),
                Err(e) => {
                    warn!(source = %source, error = %e, "source failed validation, excluding");
                    let _ = self.events.send(Event::SourceInvalid {
                        source: source.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        if valid_sources.is_empty() {
            return Ok(self.complete(PipelineState::NoValidSources, vec![], request.count));
        }

        let ffmpeg = match Ffmpeg::resolve(
            self.config.tools.ffmpeg_path.as_deref(),
            self.config.tools.search_path,
        ) {
            Ok(ffmpeg) => Some(ffmpeg),
            Err(e) => {
                warn!(error = %e, "running without transcoder");
                None
            }
        };
        let ytdlp = match YtDlp::resolve(
            self.config.tools.downloader_path.as_deref(),
            self.config.tools.search_path,
        ) {
            Ok(ytdlp) => Some(ytdlp),
            Err(e) => {
                warn!(error = %e, "running without generic downloader");
                None
            }
        };

        let http = reqwest::Client::new();
        let filter = Arc::new(PostFilterEngine::new(
            request.media_kind,
            dead_links.clone(),
            self.events.clone(),
        ));
        let resolver = Arc::new(MediaLinkResolver::new(
            http.clone(),
            dead_links,
            ffmpeg.clone(),
            ytdlp,
            self.config.media.clone(),
            self.config.tools.clone(),
        ));
        let compressor = ffmpeg
            .clone()
            .map(|f| SizeCompressor::new(f, self.config.media.clone()));
        let uploader = Uploader::new(self.sender.clone(), self.config.delivery.clone());
        let acquirer = AssetAcquirer::new(
            http,
            resolver,
            compressor,
            uploader,
            ffmpeg,
            self.config.media.clone(),
            self.events.clone(),
        );
        let fetcher = ConcurrentFetcher::new(provider, filter, self.config.fetch.clone());

        let mut processed = ProcessedUrlSet::new(self.config.fetch.processed_url_cap);
        let mut delivered_posts = Vec::new();
        let mut delay = self.config.retry.initial_delay;

        for attempt in 1..=self.config.retry.max_attempts {
            if self.cancel.is_cancelled() {
                info!(attempt = attempt, "run cancelled");
                break;
            }
            let remaining = request.count.saturating_sub(delivered_posts.len());
            if remaining == 0 {
                break;
            }

            let fetch_request = FetchRequest {
                sources: valid_sources.clone(),
                query: request.query.clone(),
                sort: request.sort,
                window: request.window,
                count: remaining,
            };
            let snapshot = Arc::new(processed.as_set().clone());
            let batch = fetcher.fetch(&fetch_request, snapshot).await;
            info!(attempt = attempt, fetched = batch.len(), remaining = remaining, "fetch round done");
            let _ = self.events.send(Event::BatchFetched {
                attempt,
                count: batch.len(),
            });

            if batch.is_empty() {
                if attempt == self.config.retry.max_attempts {
                    break;
                }
                let wait = if self.config.retry.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                let _ = self.events.send(Event::RetryScheduled {
                    attempt,
                    delay: wait,
                });
                tokio::select! {
                    () = tokio::time::sleep(wait) => {}
                    () = self.cancel.cancelled() => {
                        info!(attempt = attempt, "run cancelled during backoff");
                        break;
                    }
                }
                delay = next_delay(&self.config.retry, delay);
                continue;
            }

            // Fetched URLs are marked processed whether or not delivery
            // succeeds, so a failing asset is not retried forever
            processed.extend(batch.iter().map(|p| p.candidate.url.clone()));
            let delivered = acquirer.acquire_batch(batch).await;
            delivered_posts.extend(delivered);
        }

        let state = if delivered_posts.len() >= request.count {
            PipelineState::Satisfied
        } else {
            PipelineState::Exhausted
        };
        Ok(self.complete(state, delivered_posts, request.count))
    }

    fn complete(
        &self,
        state: PipelineState,
        delivered_posts: Vec<crate::types::AcceptedPost>,
        requested: usize,
    ) -> PipelineOutcome {
        let outcome = PipelineOutcome {
            delivered: delivered_posts.len(),
            requested,
            state,
            delivered_posts,
        };
        info!(
            delivered = outcome.delivered,
            requested = outcome.requested,
            state = ?outcome.state,
            "run complete"
        );
        let _ = self.events.send(Event::PipelineCompleted {
            delivered: outcome.delivered,
            requested: outcome.requested,
            state: outcome.state,
        });
        outcome
    }
}
