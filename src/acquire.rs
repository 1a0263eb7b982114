//! Download, validate, convert, compress, and deliver one asset
//!
//! A batch of accepted posts is acquired concurrently with per-candidate
//! failure isolation: each candidate owns a temp scope for its whole
//! lifetime, so every exit path (success, validation failure, timeout, upload
//! rejection) ends with the candidate's temp files removed.

use crate::compress::SizeCompressor;
use crate::config::MediaConfig;
use crate::download::{download_file, url_extension};
use crate::ffmpeg::Ffmpeg;
use crate::resolver::MediaLinkResolver;
use crate::temp::TempScope;
use crate::types::{AcceptedPost, AcquiredFile, Event, Metadata, ResolvedAsset};
use crate::upload::Uploader;
use futures::future::join_all;
use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Acquires resolved assets and delivers them to the channel
pub struct AssetAcquirer {
    http: reqwest::Client,
    resolver: Arc<MediaLinkResolver>,
    compressor: Option<SizeCompressor>,
    uploader: Uploader,
    ffmpeg: Option<Ffmpeg>,
    media: MediaConfig,
    events: broadcast::Sender<Event>,
}

impl AssetAcquirer {
    /// Create an acquirer
    ///
    /// `compressor` and `ffmpeg` are optional; without them oversized files
    /// and GIF candidates are dropped instead of converted.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: reqwest::Client,
        resolver: Arc<MediaLinkResolver>,
        compressor: Option<SizeCompressor>,
        uploader: Uploader,
        ffmpeg: Option<Ffmpeg>,
        media: MediaConfig,
        events: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            http,
            resolver,
            compressor,
            uploader,
            ffmpeg,
            media,
            events,
        }
    }

    /// Acquire and deliver a batch concurrently, returning the delivered posts
    pub async fn acquire_batch(&self, posts: Vec<AcceptedPost>) -> Vec<AcceptedPost> {
        let results = join_all(posts.into_iter().map(|post| self.acquire_one(post))).await;
        results.into_iter().flatten().collect()
    }

    /// Acquire and deliver one post; `None` means this candidate was dropped
    async fn acquire_one(&self, mut post: AcceptedPost) -> Option<AcceptedPost> {
        let scope = match TempScope::new("courier_") {
            Ok(scope) => scope,
            Err(e) => {
                error!(error = %e, "failed to create temp scope");
                return None;
            }
        };

        let caption = build_caption(&post.metadata);
        let resolved = self.resolve(&post, &scope).await?;
        let (path, extension) = self.materialize(&post, resolved, &scope).await?;
        let (path, extension) = self.apply_gif_policy(path, extension, &scope, &post).await?;
        let size = self.fit_budget(&path).await?;

        let file = AcquiredFile {
            path: path.clone(),
            size,
            extension,
        };
        match self.uploader.deliver(&file, caption.as_deref()).await {
            Ok(()) => {
                let _ = self.events.send(Event::MediaDelivered {
                    post_id: post.candidate.id.clone(),
                    url: post.candidate.url.clone(),
                });
                post.metadata.file_path = Some(path);
                Some(post)
            }
            Err(e) => {
                let _ = self.events.send(Event::UploadFailed {
                    post_id: post.candidate.id.clone(),
                    error: e.to_string(),
                });
                None
            }
        }
        // scope drops here; temp files are removed on every path above
    }

    /// Resolve the candidate's URL, handling gallery posts inline
    ///
    /// Gallery posts carry their asset URLs directly; one item is chosen at
    /// random instead of going through provider dispatch.
    async fn resolve(&self, post: &AcceptedPost, scope: &TempScope) -> Option<ResolvedAsset> {
        if let Some(gallery) = &post.candidate.gallery {
            let item = gallery.items.choose(&mut rand::thread_rng())?;
            debug!(post_id = %post.candidate.id, item = %item, "picked gallery item");
            return Some(ResolvedAsset::Remote(item.clone()));
        }

        let resolved = self.resolver.resolve(&post.candidate, scope).await;
        if resolved.is_none() {
            info!(
                post_id = %post.candidate.id,
                url = %post.candidate.url,
                "candidate unresolvable, dropping"
            );
        }
        resolved
    }

    /// Turn a resolved asset into a validated local file inside the scope
    async fn materialize(
        &self,
        post: &AcceptedPost,
        resolved: ResolvedAsset,
        scope: &TempScope,
    ) -> Option<(PathBuf, String)> {
        match resolved {
            ResolvedAsset::Local(path) => {
                let valid = path.is_file()
                    && std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
                if !valid {
                    warn!(path = %path.display(), "resolved local file missing or empty");
                    return None;
                }
                let extension = path
                    .extension()
                    .map(|e| e.to_string_lossy().to_ascii_lowercase())
                    .unwrap_or_else(|| "mp4".to_string());
                Some((path, extension))
            }
            ResolvedAsset::Remote(url) => {
                let extension = url_extension(&url).unwrap_or_else(|| "mp4".to_string());
                let path = scope.file(&format!("asset_{}.{}", post.candidate.id, extension));
                match download_file(&self.http, &url, &path, self.media.download_timeout).await {
                    Ok(_) => Some((path, extension)),
                    Err(e) => {
                        warn!(url = %url, error = %e, "asset download failed");
                        None
                    }
                }
            }
        }
    }

    /// Animated GIFs are transcoded to mp4 before size validation
    ///
    /// Raw GIF delivery is a policy decision, not a format limitation; the
    /// mp4 rendition is drastically smaller and streams in the channel.
    async fn apply_gif_policy(
        &self,
        path: PathBuf,
        extension: String,
        scope: &TempScope,
        post: &AcceptedPost,
    ) -> Option<(PathBuf, String)> {
        if extension != "gif" && extension != "gifv" {
            return Some((path, extension));
        }

        let Some(ffmpeg) = &self.ffmpeg else {
            warn!(post_id = %post.candidate.id, "transcoder unavailable, dropping GIF candidate");
            return None;
        };
        let output = scope.file(&format!("asset_{}_t.mp4", post.candidate.id));
        match ffmpeg
            .gif_to_mp4(&path, &output, self.media.transcode_timeout)
            .await
        {
            Ok(converted) => Some((converted, "mp4".to_string())),
            Err(e) => {
                warn!(post_id = %post.candidate.id, error = %e, "GIF conversion failed");
                None
            }
        }
    }

    /// Enforce the delivery size budget, compressing when possible
    async fn fit_budget(&self, path: &std::path::Path) -> Option<u64> {
        match &self.compressor {
            Some(compressor) => match compressor.fit(path).await {
                Ok(size) => Some(size),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "file rejected by size budget");
                    None
                }
            },
            None => {
                let size = std::fs::metadata(path).map(|m| m.len()).ok()?;
                if size > self.media.max_file_size_bytes {
                    warn!(
                        path = %path.display(),
                        size = size,
                        budget = self.media.max_file_size_bytes,
                        "file over budget and no transcoder available"
                    );
                    return None;
                }
                Some(size)
            }
        }
    }
}

/// Assemble the caption: title, bracketed flair, then the top comment
///
/// Truncation to the channel limit happens at upload time.
pub fn build_caption(metadata: &Metadata) -> Option<String> {
    let mut parts = Vec::new();
    if !metadata.title.is_empty() {
        parts.push(metadata.title.clone());
    }
    if let Some(flair) = &metadata.flair {
        parts.push(format!("[{flair}]"));
    }
    if let Some(comment) = &metadata.top_comment {
        parts.push(format!("💬 {}", comment.trim()));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeliveryConfig, ToolsConfig};
    use crate::deadlist::DeadLinkList;
    use crate::error::{AcquireError, Error, Result};
    use crate::types::{Candidate, GalleryInfo};
    use crate::upload::MediaSender;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::Path;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records delivered paths; optionally fails every call
    struct RecordingSender {
        delivered: Mutex<Vec<PathBuf>>,
        fail: bool,
    }

    impl RecordingSender {
        fn new(fail: bool) -> Self {
            Self {
                delivered: Mutex::new(vec![]),
                fail,
            }
        }

        fn record(&self, path: &Path) -> Result<()> {
            self.delivered.lock().unwrap().push(path.to_path_buf());
            if self.fail {
                Err(Error::Acquire(AcquireError::UploadFailed {
                    reason: "rejected".to_string(),
                }))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl MediaSender for RecordingSender {
        async fn send_video(
            &self,
            path: &Path,
            _width: Option<u32>,
            _height: Option<u32>,
            _caption: Option<&str>,
        ) -> Result<()> {
            self.record(path)
        }

        async fn send_photo(&self, path: &Path, _caption: Option<&str>) -> Result<()> {
            self.record(path)
        }

        async fn send_animation(&self, path: &Path, _caption: Option<&str>) -> Result<()> {
            self.record(path)
        }
    }

    fn acquirer(sender: Arc<RecordingSender>) -> AssetAcquirer {
        let (events, _) = broadcast::channel(64);
        let http = reqwest::Client::new();
        let resolver = Arc::new(MediaLinkResolver::new(
            http.clone(),
            Arc::new(DeadLinkList::in_memory()),
            None,
            None,
            MediaConfig::default(),
            ToolsConfig::default(),
        ));
        AssetAcquirer::new(
            http,
            resolver,
            None,
            Uploader::new(sender, DeliveryConfig::default()),
            None,
            MediaConfig::default(),
            events,
        )
    }

    fn post(url: &str) -> AcceptedPost {
        let candidate = Candidate {
            id: "p1".to_string(),
            source: "pics".to_string(),
            author: Some("someone".to_string()),
            title: "a title".to_string(),
            flair: None,
            score: 5,
            url: url.to_string(),
            created_at: Utc::now(),
            top_comment: None,
            gallery: None,
            native_video: None,
        };
        let metadata = crate::filter::attach_metadata(&candidate);
        AcceptedPost {
            candidate,
            metadata,
        }
    }

    #[test]
    fn caption_assembly_order_and_emptiness() {
        let mut meta = Metadata {
            title: "Title".to_string(),
            flair: Some("News".to_string()),
            author: "a".to_string(),
            score: 0,
            top_comment: Some("nice shot ".to_string()),
            file_path: None,
        };
        assert_eq!(
            build_caption(&meta).unwrap(),
            "Title\n[News]\n💬 nice shot"
        );

        meta.flair = None;
        meta.top_comment = None;
        assert_eq!(build_caption(&meta).unwrap(), "Title");

        meta.title = String::new();
        assert!(build_caption(&meta).is_none());
    }

    #[test]
    fn provider_comment_flows_into_the_caption() {
        let mut p = post("https://i.redd.it/a.jpg");
        p.candidate.top_comment = Some("nice shot".to_string());

        let metadata = crate::filter::attach_metadata(&p.candidate);
        assert_eq!(
            build_caption(&metadata).unwrap(),
            "a title\n💬 nice shot"
        );
    }

    #[tokio::test]
    async fn direct_asset_is_delivered_and_cleaned_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/photo.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .mount(&server)
            .await;

        let sender = Arc::new(RecordingSender::new(false));
        let acquirer = acquirer(sender.clone());

        let delivered = acquirer
            .acquire_batch(vec![post(&format!("{}/photo.jpg", server.uri()))])
            .await;
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].metadata.file_path.is_some());

        // The temp scope is gone once acquisition returns
        let sent = sender.delivered.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].exists(), "temp files must be removed after delivery");
    }

    #[tokio::test]
    async fn upload_rejection_drops_candidate_and_cleans_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/photo.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .mount(&server)
            .await;

        let sender = Arc::new(RecordingSender::new(true));
        let acquirer = acquirer(sender.clone());

        let delivered = acquirer
            .acquire_batch(vec![post(&format!("{}/photo.jpg", server.uri()))])
            .await;
        assert!(delivered.is_empty());

        let sent = sender.delivered.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].exists());
    }

    #[tokio::test]
    async fn unresolvable_candidate_is_isolated_from_siblings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/photo.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .mount(&server)
            .await;

        let sender = Arc::new(RecordingSender::new(false));
        let acquirer = acquirer(sender.clone());

        let mut bad = post("https://example.com/not-media-at-all");
        bad.candidate.id = "bad".to_string();

        let delivered = acquirer
            .acquire_batch(vec![bad, post(&format!("{}/photo.jpg", server.uri()))])
            .await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].candidate.id, "p1");
    }

    #[tokio::test]
    async fn gallery_item_is_used_directly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/g1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .mount(&server)
            .await;

        let sender = Arc::new(RecordingSender::new(false));
        let acquirer = acquirer(sender.clone());

        let mut galleried = post("https://feed.example.com/gallery/xyz");
        galleried.candidate.gallery = Some(GalleryInfo {
            items: vec![format!("{}/g1.jpg", server.uri())],
        });

        let delivered = acquirer.acquire_batch(vec![galleried]).await;
        assert_eq!(delivered.len(), 1);
    }

    #[tokio::test]
    async fn oversized_file_without_transcoder_is_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/big.jpg"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(vec![0u8; 300]),
            )
            .mount(&server)
            .await;

        let sender = Arc::new(RecordingSender::new(false));
        let (events, _) = broadcast::channel(64);
        let http = reqwest::Client::new();
        let resolver = Arc::new(MediaLinkResolver::new(
            http.clone(),
            Arc::new(DeadLinkList::in_memory()),
            None,
            None,
            MediaConfig::default(),
            ToolsConfig::default(),
        ));
        let tight = MediaConfig {
            max_file_size_bytes: 100,
            ..MediaConfig::default()
        };
        let acquirer = AssetAcquirer::new(
            http,
            resolver,
            None,
            Uploader::new(sender.clone(), DeliveryConfig::default()),
            None,
            tight,
            events,
        );

        let delivered = acquirer
            .acquire_batch(vec![post(&format!("{}/big.jpg", server.uri()))])
            .await;
        assert!(delivered.is_empty());
        assert!(sender.delivered.lock().unwrap().is_empty());
    }
}
