//! Provider-dispatch media link resolution
//!
//! Turns a candidate's raw URL into a downloadable asset: either a remote URL
//! ready for streaming download or a local file a provider-specific step
//! already materialized. Dispatch is a tagged route over the URL rather than
//! an if-chain, so each provider strategy stays independently testable.
//!
//! Resolution never fails the batch: every miss, including provider API
//! errors, is an "unsupported" `None` and only drops the one candidate.

mod cdn;
mod native;
mod ytdlp;

pub use ytdlp::YtDlp;

use crate::config::{MediaConfig, ToolsConfig};
use crate::deadlist::DeadLinkList;
use crate::ffmpeg::Ffmpeg;
use crate::temp::TempScope;
use crate::types::{Candidate, ResolvedAsset};
use std::sync::Arc;
use tracing::{debug, warn};

/// Hosts delegated to the generic downloader subprocess
const EXTERNAL_HOSTS: [&str; 6] = [
    "kick.com",
    "twitch.tv",
    "youtube.com",
    "youtu.be",
    "twitter.com",
    "x.com",
];

/// Extensions that pass through as direct download URLs
const DIRECT_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "mp4", "webm", "gifv"];

/// Which provider strategy handles a URL
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ProviderRoute {
    /// Natively hosted video, resolved via quality-tier probes
    NativeVideo,
    /// Page host whose media often survives only as the post's native video
    NativeFallback,
    /// Streamable JSON metadata API
    Streamable,
    /// Redgifs JSON metadata API
    Redgifs,
    /// Generic short-form host, delegated to the downloader subprocess
    External,
    /// Direct asset URL, downloaded as-is
    Direct,
    /// No strategy applies
    Unsupported,
}

/// Pick the provider strategy for a URL
///
/// Host checks run before the extension check so a provider page that happens
/// to end in a media extension still goes through its provider strategy.
pub(crate) fn route(url: &str) -> ProviderRoute {
    let lower = url.to_lowercase();
    if lower.contains("v.redd.it") {
        ProviderRoute::NativeVideo
    } else if lower.contains("imgur.com") {
        ProviderRoute::NativeFallback
    } else if lower.contains("streamable.com") {
        ProviderRoute::Streamable
    } else if lower.contains("redgifs.com") {
        ProviderRoute::Redgifs
    } else if EXTERNAL_HOSTS.iter().any(|h| lower.contains(h)) {
        ProviderRoute::External
    } else if crate::download::url_extension(&lower)
        .map(|ext| DIRECT_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
    {
        ProviderRoute::Direct
    } else {
        ProviderRoute::Unsupported
    }
}

/// Resolver over the provider strategies
pub struct MediaLinkResolver {
    http: reqwest::Client,
    dead_links: Arc<DeadLinkList>,
    ffmpeg: Option<Ffmpeg>,
    ytdlp: Option<YtDlp>,
    media: MediaConfig,
    tools: ToolsConfig,
    streamable_api: String,
    redgifs_api: String,
}

impl MediaLinkResolver {
    /// Create a resolver
    ///
    /// `ffmpeg` and `ytdlp` are optional; strategies that need an absent
    /// binary degrade to "unsupported" for their candidates instead of
    /// failing construction.
    pub fn new(
        http: reqwest::Client,
        dead_links: Arc<DeadLinkList>,
        ffmpeg: Option<Ffmpeg>,
        ytdlp: Option<YtDlp>,
        media: MediaConfig,
        tools: ToolsConfig,
    ) -> Self {
        Self {
            http,
            dead_links,
            ffmpeg,
            ytdlp,
            media,
            tools,
            streamable_api: "https://api.streamable.com/videos".to_string(),
            redgifs_api: "https://api.redgifs.com/v2/gifs".to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_api_bases(mut self, streamable: String, redgifs: String) -> Self {
        self.streamable_api = streamable;
        self.redgifs_api = redgifs;
        self
    }

    /// Resolve a candidate's URL into a downloadable asset
    ///
    /// Local outputs are written inside `scope` so they share the
    /// acquisition's cleanup lifetime. `None` means this candidate is
    /// unsupported or its provider failed; siblings are unaffected.
    pub async fn resolve(
        &self,
        candidate: &Candidate,
        scope: &TempScope,
    ) -> Option<ResolvedAsset> {
        let url = candidate.url.as_str();
        let route = route(url);
        debug!(url = %url, route = ?route, "resolving media link");

        match route {
            ProviderRoute::NativeVideo => self.resolve_native(candidate, scope).await,
            ProviderRoute::NativeFallback => {
                self.resolve_native_descriptor(candidate, scope).await
            }
            ProviderRoute::Streamable => self.resolve_streamable(url).await,
            ProviderRoute::Redgifs => self.resolve_redgifs(url).await,
            ProviderRoute::External => self.resolve_external(url, candidate, scope).await,
            ProviderRoute::Direct => Some(ResolvedAsset::Remote(url.to_string())),
            ProviderRoute::Unsupported => {
                warn!(url = %url, "unsupported URL format");
                None
            }
        }
    }

    /// Delegate to the generic downloader; a "not found" exit dead-lists the URL
    async fn resolve_external(
        &self,
        url: &str,
        candidate: &Candidate,
        scope: &TempScope,
    ) -> Option<ResolvedAsset> {
        let Some(ytdlp) = &self.ytdlp else {
            warn!(url = %url, "generic downloader unavailable, skipping");
            return None;
        };

        let output = scope.file(&format!("external_{}.mp4", candidate.id));
        match ytdlp
            .fetch(url, &output, self.tools.downloader_timeout)
            .await
        {
            ytdlp::ExternalFetch::Fetched(path) => Some(ResolvedAsset::Local(path)),
            ytdlp::ExternalFetch::NotFound => {
                warn!(url = %url, "downloader reported media gone, dead-listing");
                self.dead_links.add(url).await;
                None
            }
            ytdlp::ExternalFetch::Failed => None,
        }
    }
}
