//! Natively hosted video resolution
//!
//! Native video lives at a base URL with separate DASH tracks per quality
//! tier and an optional audio track. Resolution probes the tiers in
//! descending quality order, downloads the first reachable video track, then
//! tries the audio track and muxes the two. The output always lands under one
//! canonical name per post, whether or not audio was available.

use super::MediaLinkResolver;
use crate::download::{download_file, probe};
use crate::temp::TempScope;
use crate::types::{Candidate, NativeVideoInfo, ResolvedAsset};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// DASH quality tiers, best first
const DASH_TIERS: [&str; 4] = ["1080", "720", "480", "360"];

impl MediaLinkResolver {
    /// Resolve a URL on the native video host
    ///
    /// The base URL is taken from the post's structured descriptors when
    /// present, falling back to the URL itself.
    pub(super) async fn resolve_native(
        &self,
        candidate: &Candidate,
        scope: &TempScope,
    ) -> Option<ResolvedAsset> {
        let base = candidate
            .native_video
            .as_ref()
            .and_then(base_from_descriptor)
            .or_else(|| extract_native_base(&candidate.url))?;
        self.fetch_native(&base, &candidate.id, scope).await
    }

    /// Rescue a dead page URL via the post's native-video descriptor
    ///
    /// Some image hosts delete media while the feed's own copy survives; when
    /// the post carries a structured descriptor the video can still be
    /// fetched from there.
    pub(super) async fn resolve_native_descriptor(
        &self,
        candidate: &Candidate,
        scope: &TempScope,
    ) -> Option<ResolvedAsset> {
        let Some(base) = candidate
            .native_video
            .as_ref()
            .and_then(base_from_descriptor)
        else {
            warn!(url = %candidate.url, "no native-video descriptor to rescue from");
            return None;
        };
        info!(url = %candidate.url, base = %base, "rescuing via native-video descriptor");
        self.fetch_native(&base, &candidate.id, scope).await
    }

    /// Probe tiers, download tracks, and produce the canonical output file
    async fn fetch_native(
        &self,
        base: &str,
        post_id: &str,
        scope: &TempScope,
    ) -> Option<ResolvedAsset> {
        let video_url = self.find_dash_url(base).await?;

        let video_path = scope.file(&format!("native_{post_id}_v.mp4"));
        let audio_path = scope.file(&format!("native_{post_id}_a.m4a"));
        let out_path = scope.file(&format!("native_{post_id}.mp4"));

        if let Err(e) = download_file(
            &self.http,
            &video_url,
            &video_path,
            self.media.download_timeout,
        )
        .await
        {
            warn!(url = %video_url, error = %e, "video track download failed");
            return None;
        }

        let audio_url = format!("{base}/DASH_AUDIO_128.mp4");
        let legacy_audio_url = format!("{base}/DASH_audio.mp4");
        let mut has_audio = download_file(
            &self.http,
            &audio_url,
            &audio_path,
            self.media.download_timeout,
        )
        .await
        .is_ok();
        if !has_audio {
            has_audio = download_file(
                &self.http,
                &legacy_audio_url,
                &audio_path,
                self.media.download_timeout,
            )
            .await
            .is_ok();
        }

        if has_audio {
            if let Some(ffmpeg) = &self.ffmpeg {
                match ffmpeg
                    .mux_av(&video_path, &audio_path, &out_path, self.media.transcode_timeout)
                    .await
                {
                    Ok(muxed) => {
                        crate::temp::cleanup_file(&video_path);
                        crate::temp::cleanup_file(&audio_path);
                        return Some(ResolvedAsset::Local(muxed));
                    }
                    Err(e) => {
                        warn!(error = %e, "mux failed, falling back to video-only");
                    }
                }
            } else {
                debug!("transcoder unavailable, delivering video-only");
            }
        }

        // Video-only fallback still lands under the canonical name
        crate::temp::cleanup_file(&audio_path);
        if let Err(e) = std::fs::rename(&video_path, &out_path) {
            warn!(error = %e, "failed to finalize video-only output");
            return None;
        }
        Some(ResolvedAsset::Local(out_path))
    }

    /// First reachable DASH video track, best tier first
    async fn find_dash_url(&self, base: &str) -> Option<String> {
        for tier in DASH_TIERS {
            let url = format!("{base}/DASH_{tier}.mp4");
            if probe(&self.http, &url, self.media.probe_timeout).await {
                info!(url = %url, "found reachable quality tier");
                return Some(url);
            }
        }
        warn!(base = %base, "no reachable quality tier");
        None
    }
}

/// Extract the canonical native-video base URL from descriptor URLs
fn base_from_descriptor(info: &NativeVideoInfo) -> Option<String> {
    [&info.dash_url, &info.fallback_url, &info.scrubber_url]
        .into_iter()
        .flatten()
        .find_map(|url| extract_native_base(url))
}

/// Find a `https://v.redd.it/<id>` base in plain or JSON-escaped text
fn extract_native_base(text: &str) -> Option<String> {
    static PLAIN: OnceLock<regex::Regex> = OnceLock::new();
    static ESCAPED: OnceLock<regex::Regex> = OnceLock::new();

    let plain = PLAIN.get_or_init(|| {
        // The pattern is a literal constant; it cannot fail to compile.
        #[allow(clippy::unwrap_used)]
        let re = regex::Regex::new(r"(https://v\.redd\.it/[A-Za-z0-9]+)").unwrap();
        re
    });
    if let Some(m) = plain.captures(text) {
        return Some(m[1].to_string());
    }

    let escaped = ESCAPED.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        let re = regex::Regex::new(r"https:\\/\\/v\.redd\.it\\/([A-Za-z0-9]+)").unwrap();
        re
    });
    escaped
        .captures(text)
        .map(|m| format!("https://v.redd.it/{}", &m[1]))
}
