//! Per-candidate filtering, metadata attach, and random sampling
//!
//! Each candidate is either accepted (with derived [`Metadata`]) or skipped
//! with a single [`SkipReason`], evaluated in a fixed order so every drop has
//! exactly one reason. Skips are counted into a histogram for one summary log
//! line per batch; individual skips are broadcast as events, never stored.

use crate::deadlist::DeadLinkList;
use crate::types::{AcceptedPost, Candidate, Event, MediaKind, Metadata, SkipReason};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Extensions accepted as direct media links
const MEDIA_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "mp4", "webm", "gifv"];

/// Host patterns the resolver knows how to handle
const SUPPORTED_PATTERNS: [&str; 12] = [
    "/gallery/",
    "v.redd.it",
    "i.redd.it",
    "imgur.com",
    "streamable.com",
    "redgifs.com",
    "kick.com",
    "twitch.tv",
    "youtube.com",
    "youtu.be",
    "twitter.com",
    "x.com",
];

/// Short-link host that shut down; its URLs never resolve
const DEFUNCT_HOST: &str = "gfycat.com";

/// Accept/skip filter over fetched candidates
pub struct PostFilterEngine {
    media_kind: Option<MediaKind>,
    dead_links: Arc<DeadLinkList>,
    events: broadcast::Sender<Event>,
}

impl PostFilterEngine {
    /// Create a filter for the requested media kind (None accepts both)
    pub fn new(
        media_kind: Option<MediaKind>,
        dead_links: Arc<DeadLinkList>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            media_kind,
            dead_links,
            events,
        }
    }

    /// Decide whether a candidate should be skipped, and why
    ///
    /// Checks run in a fixed order; the first match wins.
    pub async fn should_skip(
        &self,
        candidate: &Candidate,
        processed: &HashSet<String>,
    ) -> Option<SkipReason> {
        let url = candidate.url.as_str();
        if url.is_empty() || !is_media_url(url) {
            return Some(SkipReason::NonMedia);
        }
        if processed.contains(url) {
            return Some(SkipReason::AlreadyProcessed);
        }
        if self.dead_links.contains(url).await {
            return Some(SkipReason::Blacklisted);
        }
        if url.to_lowercase().contains(DEFUNCT_HOST) {
            return Some(SkipReason::UnsupportedHost);
        }
        if !matches_kind(url, candidate, self.media_kind) {
            return Some(SkipReason::WrongMediaType);
        }
        None
    }

    /// Filter a batch and return up to `take` accepted posts, sampled uniformly
    ///
    /// Skips are counted and logged as one histogram line. Sampling is without
    /// replacement; fewer than `take` accepted posts returns them all.
    pub async fn filter(
        &self,
        candidates: Vec<Candidate>,
        processed: &HashSet<String>,
        take: usize,
    ) -> Vec<AcceptedPost> {
        let total = candidates.len();
        let mut skips: HashMap<SkipReason, usize> = HashMap::new();
        let mut accepted = Vec::new();

        for candidate in candidates {
            match self.should_skip(&candidate, processed).await {
                Some(reason) => {
                    *skips.entry(reason).or_insert(0) += 1;
                    debug!(
                        post_id = %candidate.id,
                        url = %candidate.url,
                        reason = reason.label(),
                        "candidate skipped"
                    );
                    let _ = self.events.send(Event::CandidateSkipped {
                        post_id: candidate.id.clone(),
                        reason: reason.label(),
                    });
                }
                None => {
                    let metadata = attach_metadata(&candidate);
                    accepted.push(AcceptedPost {
                        candidate,
                        metadata,
                    });
                }
            }
        }

        if !skips.is_empty() {
            let mut summary: Vec<String> = skips
                .iter()
                .map(|(reason, count)| format!("{}: {}", reason.label(), count))
                .collect();
            summary.sort();
            info!(
                total = total,
                accepted = accepted.len(),
                skipped = %summary.join(", "),
                "filter summary"
            );
        }

        sample(accepted, take)
    }
}

/// Uniform random sample without replacement of `min(count, posts.len())`
pub fn sample(mut posts: Vec<AcceptedPost>, count: usize) -> Vec<AcceptedPost> {
    let mut rng = rand::thread_rng();
    posts.shuffle(&mut rng);
    posts.truncate(count);
    posts
}

/// Derive display metadata for an accepted candidate
pub fn attach_metadata(candidate: &Candidate) -> Metadata {
    Metadata {
        title: truncate_chars(candidate.title.trim(), 100),
        flair: candidate
            .flair
            .as_deref()
            .map(clean_flair)
            .filter(|f| !f.is_empty()),
        author: candidate
            .author
            .clone()
            .unwrap_or_else(|| "[deleted]".to_string()),
        score: candidate.score,
        top_comment: candidate
            .top_comment
            .clone()
            .filter(|c| !c.trim().is_empty()),
        file_path: None,
    }
}

/// Whether the URL looks like media the pipeline can handle at all
fn is_media_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    has_media_extension(&lower) || SUPPORTED_PATTERNS.iter().any(|p| lower.contains(p))
}

fn has_media_extension(lower_url: &str) -> bool {
    crate::download::url_extension(lower_url)
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Whether the URL plausibly matches the requested media kind
///
/// Heuristic by design: gallery paths count as image, the native-video host
/// and video API hosts count as video, and a structured native-video
/// descriptor on the post counts as video even when the URL is opaque.
fn matches_kind(url: &str, candidate: &Candidate, kind: Option<MediaKind>) -> bool {
    let Some(kind) = kind else {
        return true;
    };
    let lower = url.to_lowercase();
    let ext = crate::download::url_extension(&lower);

    match kind {
        MediaKind::Image => {
            matches!(ext.as_deref(), Some("jpg" | "jpeg" | "png")) || lower.contains("/gallery/")
        }
        MediaKind::Video => {
            matches!(ext.as_deref(), Some("mp4" | "webm" | "gifv" | "gif"))
                || lower.contains("v.redd.it")
                || lower.contains("streamable.com")
                || lower.contains("redgifs.com")
                || candidate.native_video.is_some()
        }
    }
}

/// Strip `:emoji:` tags from flair text and truncate to 50 characters
fn clean_flair(flair: &str) -> String {
    static EMOJI_TAG: OnceLock<regex::Regex> = OnceLock::new();
    let re = EMOJI_TAG.get_or_init(|| {
        // The pattern is a literal constant; it cannot fail to compile.
        #[allow(clippy::unwrap_used)]
        let re = regex::Regex::new(r":[^:\s]+:").unwrap();
        re
    });
    let cleaned = re.replace_all(flair, "");
    truncate_chars(cleaned.trim(), 50)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
