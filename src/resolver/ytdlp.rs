//! Generic downloader subprocess wrapper
//!
//! Short-form video hosts without a usable metadata API are delegated to
//! yt-dlp. The subprocess runs under a wall-clock timeout and is killed on
//! expiry. A non-zero exit whose stderr looks like "media gone" is a
//! permanent outcome the caller should dead-list; everything else is a
//! one-off failure that only drops the candidate.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Handle to the yt-dlp binary
#[derive(Clone, Debug)]
pub struct YtDlp {
    binary_path: PathBuf,
}

/// Outcome of one downloader invocation
#[derive(Debug)]
pub(crate) enum ExternalFetch {
    /// Media downloaded to the given path
    Fetched(PathBuf),
    /// The host reports the media permanently gone
    NotFound,
    /// Transient or unclassified failure
    Failed,
}

impl YtDlp {
    /// Create a handle with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find yt-dlp in PATH
    pub fn from_path() -> Option<Self> {
        which::which("yt-dlp").ok().map(Self::new)
    }

    /// Resolve a handle from config: explicit path, then PATH search
    pub fn resolve(explicit: Option<&Path>, search_path: bool) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self::new(path.to_path_buf()));
        }
        if search_path {
            if let Some(ytdlp) = Self::from_path() {
                return Ok(ytdlp);
            }
        }
        Err(Error::NotSupported(
            "yt-dlp binary not found; generic hosts unavailable".to_string(),
        ))
    }

    /// Download `url` to `output` under a wall-clock timeout
    pub(crate) async fn fetch(
        &self,
        url: &str,
        output: &Path,
        timeout: Duration,
    ) -> ExternalFetch {
        let output_str = output.display().to_string();
        let args = [
            "--quiet",
            "--no-warnings",
            "--no-part",
            "--no-mtime",
            "--no-playlist",
            "--format",
            "bestvideo[ext=mp4]+bestaudio[ext=m4a]/mp4",
            "--output",
            &output_str,
            url,
        ];
        debug!(binary = %self.binary_path.display(), url = %url, "spawning downloader");

        let child = Command::new(&self.binary_path)
            .args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, "failed to spawn downloader");
                return ExternalFetch::Failed;
            }
        };

        let result = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(error = %e, "downloader wait failed");
                return ExternalFetch::Failed;
            }
            Err(_) => {
                // kill_on_drop reaps the child when the future is dropped
                warn!(url = %url, timeout = ?timeout, "downloader timed out, killing");
                return ExternalFetch::Failed;
            }
        };

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stderr = stderr.trim();
            if is_not_found(stderr) {
                warn!(url = %url, stderr = %stderr, "downloader reports media gone");
                return ExternalFetch::NotFound;
            }
            error!(url = %url, code = ?result.status.code(), stderr = %stderr, "downloader failed");
            return ExternalFetch::Failed;
        }

        if !output.is_file() {
            error!(url = %url, "downloader exited cleanly but produced no file");
            return ExternalFetch::Failed;
        }

        info!(url = %url, path = %output.display(), "downloaded via generic downloader");
        ExternalFetch::Fetched(output.to_path_buf())
    }
}

/// Whether stderr signals the media is permanently gone
fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("404")
        || lower.contains("not found")
        || lower.contains("video unavailable")
        || lower.contains("content isn't available")
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_explicit_path() {
        let ytdlp = YtDlp::resolve(Some(Path::new("/opt/bin/yt-dlp")), true).unwrap();
        assert_eq!(ytdlp.binary_path, PathBuf::from("/opt/bin/yt-dlp"));
    }

    #[test]
    fn resolve_without_search_is_not_supported() {
        assert!(matches!(
            YtDlp::resolve(None, false),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn not_found_classification() {
        assert!(is_not_found("ERROR: [youtube] abc: Video unavailable"));
        assert!(is_not_found("HTTP Error 404: Not Found"));
        assert!(is_not_found("ERROR: Unable to download webpage (404)"));
        assert!(!is_not_found("ERROR: unable to connect: timed out"));
        assert!(!is_not_found(""));
    }

    #[tokio::test]
    async fn missing_binary_is_a_failed_fetch() {
        let ytdlp = YtDlp::new(PathBuf::from("/nonexistent/yt-dlp-xyz"));
        let scope = crate::temp::TempScope::new("ytdlp_test_").unwrap();
        let outcome = ytdlp
            .fetch(
                "https://youtu.be/abc",
                &scope.file("out.mp4"),
                Duration::from_secs(5),
            )
            .await;
        assert!(matches!(outcome, ExternalFetch::Failed));
    }
}
