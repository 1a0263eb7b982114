//! Core types and events for the media pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Media type requested by the caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Still images (jpg, jpeg, png)
    Image,
    /// Video containers and animated formats (mp4, webm, gifv, gif)
    Video,
}

/// Listing sort mode for a source
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    /// Currently trending posts (default)
    #[default]
    Hot,
    /// Highest-scored posts within a time window
    Top,
    /// Most recent posts
    New,
}

/// Time window for top-sorted listings and searches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    /// Past 24 hours
    Day,
    /// Past 7 days
    Week,
    /// Past month
    Month,
    /// Past year
    Year,
    /// All time
    All,
}

/// Gallery/attachment descriptor carried by multi-image posts
///
/// Items are the direct asset URLs in the post's own declared order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryInfo {
    /// Direct asset URLs, in post order
    pub items: Vec<String>,
}

/// Structured video descriptor some posts carry for natively hosted video
///
/// Any of the URLs may embed the canonical native-video base URL.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeVideoInfo {
    /// DASH manifest URL, if present
    pub dash_url: Option<String>,
    /// Progressive fallback URL, if present
    pub fallback_url: Option<String>,
    /// Low-resolution scrubber URL, if present
    pub scrubber_url: Option<String>,
}

/// A fetched post awaiting filtering
///
/// Immutable after fetch; derived [`Metadata`] is attached separately once the
/// candidate passes filtering. Constructed per fetch call and discarded after
/// one pipeline attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Provider-assigned post identifier
    pub id: String,
    /// Source the post was fetched from
    pub source: String,
    /// Post author, if not deleted
    pub author: Option<String>,
    /// Post title
    pub title: String,
    /// Post flair/label text, if any
    pub flair: Option<String>,
    /// Post score (upvotes)
    pub score: i64,
    /// Raw media URL carried by the post
    pub url: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Top comment text, when the provider supplies one
    #[serde(default)]
    pub top_comment: Option<String>,
    /// Gallery descriptor for multi-image posts
    #[serde(default)]
    pub gallery: Option<GalleryInfo>,
    /// Structured native-video descriptor, if the provider supplied one
    #[serde(default)]
    pub native_video: Option<NativeVideoInfo>,
}

/// Derived metadata attached to an accepted candidate
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Title truncated to 100 characters
    pub title: String,
    /// Flair with `:emoji:` patterns stripped, truncated to 50 characters
    pub flair: Option<String>,
    /// Author name or "[deleted]"
    pub author: String,
    /// Post score at fetch time
    pub score: i64,
    /// Top comment text, when the provider supplies one
    pub top_comment: Option<String>,
    /// Local file path, filled once the asset is acquired
    pub file_path: Option<PathBuf>,
}

/// A candidate that passed filtering, with its derived metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptedPost {
    /// The underlying candidate
    pub candidate: Candidate,
    /// Metadata derived at accept time
    pub metadata: Metadata,
}

/// Reason a candidate was skipped by the filter
///
/// Used only for counting and logging; never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// URL does not look like media and matches no supported host
    NonMedia,
    /// Asset URL already delivered in this run
    AlreadyProcessed,
    /// URL is on the persisted dead-link list
    Blacklisted,
    /// Known-defunct short-link host
    UnsupportedHost,
    /// URL does not match the requested media type
    WrongMediaType,
}

impl SkipReason {
    /// Stable label used in skip-histogram logging
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::NonMedia => "non-media",
            SkipReason::AlreadyProcessed => "already-processed",
            SkipReason::Blacklisted => "blacklisted",
            SkipReason::UnsupportedHost => "unsupported-host",
            SkipReason::WrongMediaType => "wrong-media-type",
        }
    }
}

/// Output of the media link resolver
///
/// Ephemeral; owned by the acquisition call that requested it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedAsset {
    /// A remote URL still to be downloaded
    Remote(String),
    /// A local file already materialized by a provider-specific step
    Local(PathBuf),
}

/// A local media file ready for upload
///
/// Size is guaranteed to be at or under the delivery budget once the
/// compressor has run; otherwise the file has been discarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcquiredFile {
    /// Path to the local file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Lowercased container extension without the dot (e.g. "mp4")
    pub extension: String,
}

/// Terminal state of one orchestrator run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Requested quota fully delivered
    Satisfied,
    /// Retry budget exhausted before the quota was met
    Exhausted,
    /// None of the named sources were valid or accessible
    NoValidSources,
}

/// Summary of one orchestrator run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineOutcome {
    /// Number of assets successfully delivered
    pub delivered: usize,
    /// Number of assets requested
    pub requested: usize,
    /// Terminal state
    pub state: PipelineState,
    /// Candidates that were delivered, in completion order
    pub delivered_posts: Vec<AcceptedPost>,
}

impl PipelineOutcome {
    /// Human-readable one-line summary, suitable for user notification
    pub fn summary(&self) -> String {
        match self.state {
            PipelineState::NoValidSources => {
                "No valid or accessible sources provided.".to_string()
            }
            PipelineState::Satisfied => {
                format!("Delivered {} of {} requested.", self.delivered, self.requested)
            }
            PipelineState::Exhausted if self.delivered == 0 => {
                format!("No media found ({} requested).", self.requested)
            }
            PipelineState::Exhausted => {
                format!("Only {} of {} delivered.", self.delivered, self.requested)
            }
        }
    }
}

/// Events emitted by the pipeline
///
/// Consumers subscribe via [`crate::pipeline::MediaPipeline::subscribe`].
/// Events are broadcast; if no subscriber is listening they are dropped.
#[derive(Clone, Debug)]
pub enum Event {
    /// A named source failed validation and was excluded from the run
    SourceInvalid {
        /// The source name
        source: String,
        /// Why the source was excluded
        reason: String,
    },
    /// A fetch round completed
    BatchFetched {
        /// Attempt number (1-based)
        attempt: u32,
        /// Number of candidates returned after filtering and dedup
        count: usize,
    },
    /// A candidate was dropped by the filter
    CandidateSkipped {
        /// Post identifier
        post_id: String,
        /// Stable skip-reason label
        reason: &'static str,
    },
    /// An asset was delivered to the channel
    MediaDelivered {
        /// Post identifier
        post_id: String,
        /// Asset URL that was delivered
        url: String,
    },
    /// An upload failed terminally for one asset
    UploadFailed {
        /// Post identifier
        post_id: String,
        /// Failure description
        error: String,
    },
    /// An empty fetch round scheduled a retry
    RetryScheduled {
        /// Attempt number just completed (1-based)
        attempt: u32,
        /// Delay before the next attempt
        delay: std::time::Duration,
    },
    /// The run reached a terminal state
    PipelineCompleted {
        /// Number delivered
        delivered: usize,
        /// Number requested
        requested: usize,
        /// Terminal state
        state: PipelineState,
    },
}

/// Capped set of asset URLs already delivered in this run
///
/// Dedup is best-effort and in-memory. When the set grows past its cap it is
/// cleared wholesale, accepting that a stale item can be re-delivered right
/// after a clear; the alternative (an eviction order) buys nothing for a
/// best-effort cache.
#[derive(Debug)]
pub struct ProcessedUrlSet {
    cap: usize,
    urls: std::collections::HashSet<String>,
}

impl ProcessedUrlSet {
    /// Create an empty set with the given cap
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            urls: std::collections::HashSet::new(),
        }
    }

    /// Whether a URL has already been recorded
    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    /// Record a batch of URLs, clearing the whole set if the cap is exceeded
    pub fn extend<I: IntoIterator<Item = String>>(&mut self, urls: I) {
        self.urls.extend(urls);
        if self.urls.len() > self.cap {
            tracing::warn!(
                len = self.urls.len(),
                cap = self.cap,
                "processed-URL cache exceeded cap, resetting"
            );
            self.urls.clear();
        }
    }

    /// Number of recorded URLs
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// Whether no URLs are recorded
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Borrow the underlying set, for handing a snapshot to fetch tasks
    pub fn as_set(&self) -> &std::collections::HashSet<String> {
        &self.urls
    }
}
