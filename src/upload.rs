//! Delivery channel contract and upload dispatch
//!
//! The channel is an external collaborator behind the [`MediaSender`] trait.
//! [`Uploader`] dispatches an acquired file to the right sender method by
//! container extension and retries only when the channel signals a timeout;
//! any other rejection is terminal for that asset. A reqwest multipart
//! bot-API implementation is provided as the default sender.

use crate::config::{DeliveryConfig, RetryConfig};
use crate::error::{AcquireError, Error, Result};
use crate::retry::retry_with_backoff;
use crate::types::AcquiredFile;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Contract consumed from the delivery channel
///
/// Implementations must map their transport's "slow down / timed out" signal
/// to [`AcquireError::UploadTimedOut`]; that is the only failure the uploader
/// retries.
#[async_trait]
pub trait MediaSender: Send + Sync {
    /// Send a video file with optional dimensions and caption
    async fn send_video(
        &self,
        path: &Path,
        width: Option<u32>,
        height: Option<u32>,
        caption: Option<&str>,
    ) -> Result<()>;

    /// Send a still image with an optional caption
    async fn send_photo(&self, path: &Path, caption: Option<&str>) -> Result<()>;

    /// Send an animation (GIF-like) with an optional caption
    async fn send_animation(&self, path: &Path, caption: Option<&str>) -> Result<()>;
}

/// Upload dispatcher with timeout-only bounded retry
pub struct Uploader {
    sender: Arc<dyn MediaSender>,
    config: DeliveryConfig,
}

impl Uploader {
    /// Create an uploader over the given sender
    pub fn new(sender: Arc<dyn MediaSender>, config: DeliveryConfig) -> Self {
        Self { sender, config }
    }

    /// Deliver an acquired file, retrying only on the channel's timeout signal
    ///
    /// The caption is truncated to the channel's limit before sending.
    pub async fn deliver(&self, file: &AcquiredFile, caption: Option<&str>) -> Result<()> {
        let caption = caption.map(|c| truncate_caption(c, self.config.caption_limit));

        let retry = RetryConfig {
            max_attempts: self.config.upload_attempts.saturating_sub(1),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.5,
            jitter: true,
        };

        let result = retry_with_backoff(&retry, || self.dispatch(file, caption.as_deref())).await;
        match &result {
            Ok(()) => info!(path = %file.path.display(), size = file.size, "media delivered"),
            Err(e) => warn!(path = %file.path.display(), error = %e, "delivery failed"),
        }
        result
    }

    /// Route the file to the sender method matching its extension
    ///
    /// Dimensions are passed as `None`; a sender whose transport benefits from
    /// width/height is expected to probe the file itself.
    async fn dispatch(&self, file: &AcquiredFile, caption: Option<&str>) -> Result<()> {
        match file.extension.as_str() {
            "mp4" | "webm" => {
                self.sender
                    .send_video(&file.path, None, None, caption)
                    .await
            }
            "jpg" | "jpeg" | "png" => self.sender.send_photo(&file.path, caption).await,
            "gif" => self.sender.send_animation(&file.path, caption).await,
            _ => Err(Error::Acquire(AcquireError::UnsupportedMediaType {
                path: file.path.clone(),
            })),
        }
    }
}

/// Truncate a caption to `limit` characters, ending with an ellipsis when cut
pub fn truncate_caption(caption: &str, limit: usize) -> String {
    if caption.chars().count() <= limit {
        return caption.to_string();
    }
    warn!(
        chars = caption.chars().count(),
        limit = limit,
        "caption over channel limit, truncating"
    );
    let mut truncated: String = caption.chars().take(limit.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

/// Bot-API delivery channel over HTTP multipart
///
/// Sends files to `{api_base}/send{Video,Photo,Animation}` with the file as a
/// multipart part and `chat_id`/`caption` as form fields. Request timeouts map
/// to [`AcquireError::UploadTimedOut`]; any non-success response is a terminal
/// [`AcquireError::UploadFailed`].
pub struct BotApiSender {
    client: reqwest::Client,
    api_base: String,
    chat_id: String,
}

impl BotApiSender {
    /// Create a sender for the given bot API base URL and chat
    ///
    /// `api_base` should already include the bot token, e.g.
    /// `https://api.example.org/bot<token>`.
    pub fn new(api_base: String, chat_id: String, config: &DeliveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.upload_timeout)
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            chat_id,
        })
    }

    async fn send_multipart(
        &self,
        endpoint: &str,
        part_name: &str,
        path: &Path,
        caption: Option<&str>,
        extra: &[(&str, String)],
    ) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .part(
                part_name.to_string(),
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }
        for (key, value) in extra {
            form = form.text(key.to_string(), value.clone());
        }

        let url = format!("{}/{}", self.api_base, endpoint);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Acquire(AcquireError::UploadTimedOut)
                } else {
                    Error::Acquire(AcquireError::UploadFailed {
                        reason: e.to_string(),
                    })
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        // 504s from the API gateway count as the channel's timeout signal
        if status == reqwest::StatusCode::GATEWAY_TIMEOUT
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            return Err(Error::Acquire(AcquireError::UploadTimedOut));
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Acquire(AcquireError::UploadFailed {
            reason: format!("{endpoint} returned {status}: {body}"),
        }))
    }
}

#[async_trait]
impl MediaSender for BotApiSender {
    async fn send_video(
        &self,
        path: &Path,
        width: Option<u32>,
        height: Option<u32>,
        caption: Option<&str>,
    ) -> Result<()> {
        let mut extra = vec![("supports_streaming", "true".to_string())];
        if let Some(w) = width {
            extra.push(("width", w.to_string()));
        }
        if let Some(h) = height {
            extra.push(("height", h.to_string()));
        }
        self.send_multipart("sendVideo", "video", path, caption, &extra)
            .await
    }

    async fn send_photo(&self, path: &Path, caption: Option<&str>) -> Result<()> {
        self.send_multipart("sendPhoto", "photo", path, caption, &[])
            .await
    }

    async fn send_animation(&self, path: &Path, caption: Option<&str>) -> Result<()> {
        self.send_multipart("sendAnimation", "animation", path, caption, &[])
            .await
    }
}
