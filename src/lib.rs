//! # media-courier
//!
//! An async pipeline that pulls media posts from a feed provider, filters and
//! deduplicates them, resolves each post's URL across hosting formats,
//! downloads and fits the asset to a delivery size budget, and uploads it to a
//! delivery channel, retrying with exponential backoff until the requested
//! quota is met or the retry budget runs out.
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_courier::{
//!     BotApiSender, Config, MediaPipeline, PipelineRequest, ProviderHandle, SortMode,
//! };
//! use std::sync::Arc;
//!
//! # async fn make_provider() -> media_courier::Result<Arc<dyn media_courier::SourceProvider>> {
//! #     unimplemented!()
//! # }
//! #[tokio::main]
//! async fn main() -> media_courier::Result<()> {
//!     let config = Config::default();
//!     let sender = Arc::new(BotApiSender::new(
//!         "https://api.telegram.org/bot<token>".to_string(),
//!         "-1001234".to_string(),
//!         &config.delivery,
//!     )?);
//!     let provider = ProviderHandle::new(make_provider);
//!
//!     let pipeline = MediaPipeline::new(config, provider, sender);
//!     let outcome = pipeline
//!         .run(PipelineRequest {
//!             sources: vec!["pics".to_string()],
//!             query: None,
//!             sort: SortMode::Hot,
//!             window: None,
//!             media_kind: None,
//!             count: 3,
//!         })
//!         .await?;
//!     println!("{}", outcome.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`pipeline`] - orchestrator: validation, retry loop, terminal states
//! - [`fetcher`] - concurrent multi-source fetching with quota allocation
//! - [`filter`] - media-URL filtering, dedup, and metadata derivation
//! - [`resolver`] - per-host URL resolution (native video, CDN APIs, yt-dlp)
//! - [`compress`] - iterative re-encoding down to the delivery size budget
//! - [`upload`] - delivery-channel abstraction with timeout-only retry
//!
//! The feed provider and the delivery channel are both injected traits
//! ([`SourceProvider`], [`MediaSender`]), so the pipeline itself stays free of
//! any concrete service client.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Asset acquisition: download, convert, compress, deliver
pub mod acquire;
/// Iterative size-budget compression
pub mod compress;
/// Configuration types
pub mod config;
/// Persisted dead-link list
pub mod deadlist;
/// Streaming HTTP download helpers
pub mod download;
/// Error types
pub mod error;
/// Concurrent multi-source fetching
pub mod fetcher;
/// ffmpeg subprocess wrapper
pub mod ffmpeg;
/// Candidate filtering and metadata derivation
pub mod filter;
/// Pipeline orchestrator
pub mod pipeline;
/// Per-host media link resolution
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Feed provider abstraction
pub mod source;
/// Scoped temp-file management
pub mod temp;
/// Core types and events
pub mod types;
/// Delivery channel abstraction and uploader
pub mod upload;

pub use acquire::{build_caption, AssetAcquirer};
pub use compress::SizeCompressor;
pub use config::{
    Config, DeliveryConfig, FetchConfig, MediaConfig, RetryConfig, ToolsConfig,
};
pub use deadlist::DeadLinkList;
pub use error::{AcquireError, Error, Result, SourceError};
pub use fetcher::{ConcurrentFetcher, FetchRequest};
pub use ffmpeg::{EncodeParams, Ffmpeg};
pub use filter::PostFilterEngine;
pub use pipeline::{MediaPipeline, PipelineRequest};
pub use resolver::{MediaLinkResolver, YtDlp};
pub use retry::{retry_with_backoff, IsRetryable};
pub use source::{ProviderHandle, SourceProvider};
pub use types::{
    AcceptedPost, AcquiredFile, Candidate, Event, GalleryInfo, MediaKind, Metadata,
    NativeVideoInfo, PipelineOutcome, PipelineState, ProcessedUrlSet, ResolvedAsset, SkipReason,
    SortMode, TimeWindow,
};
pub use upload::{BotApiSender, MediaSender, Uploader};
