//! Transcoder wrapper around the external ffmpeg binary
//!
//! All CPU-bound media work (GIF conversion, audio/video muxing, re-encoding)
//! is delegated to ffmpeg subprocesses so the event loop never blocks on it.
//! Every invocation carries a wall-clock timeout; on timeout the child is
//! killed and the attempt is counted as failed, never left hanging.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Handle to the ffmpeg binary
///
/// Construct with an explicit path or discover it on PATH. When no binary is
/// available the constructor fails with [`Error::NotSupported`] so callers can
/// degrade (e.g. skip compression-dependent candidates) instead of crashing
/// mid-pipeline.
#[derive(Clone, Debug)]
pub struct Ffmpeg {
    binary_path: PathBuf,
}

/// Encoding parameters for one compression pass
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EncodeParams {
    /// x264 constant rate factor (higher = smaller, worse)
    pub crf: u32,
    /// Optional bitrate ceiling in kbps; enforced from the second pass on
    pub max_bitrate_kbps: Option<u32>,
}

impl Ffmpeg {
    /// Create a handle with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find ffmpeg in PATH
    pub fn from_path() -> Option<Self> {
        which::which("ffmpeg").ok().map(Self::new)
    }

    /// Resolve a handle from config: explicit path, then PATH search
    pub fn resolve(explicit: Option<&Path>, search_path: bool) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self::new(path.to_path_buf()));
        }
        if search_path {
            if let Some(ffmpeg) = Self::from_path() {
                return Ok(ffmpeg);
            }
        }
        Err(Error::NotSupported(
            "ffmpeg binary not found; transcoding unavailable".to_string(),
        ))
    }

    /// Convert an animated GIF (or .gifv) to an mp4 container
    ///
    /// The input file is removed on success; the mp4 path is returned.
    pub async fn gif_to_mp4(
        &self,
        input: &Path,
        output: &Path,
        timeout: Duration,
    ) -> Result<PathBuf> {
        let args = [
            "-y",
            "-i",
            &input.display().to_string(),
            "-movflags",
            "faststart",
            "-pix_fmt",
            "yuv420p",
            "-preset",
            "ultrafast",
            // Even dimensions are required by yuv420p
            "-vf",
            "scale=trunc(iw/2)*2:trunc(ih/2)*2",
            &output.display().to_string(),
        ];
        self.run(&args, timeout).await?;

        if !output.is_file() {
            return Err(Error::ExternalTool(format!(
                "ffmpeg reported success but {} is missing",
                output.display()
            )));
        }
        crate::temp::cleanup_file(input);
        info!(output = %output.display(), "converted GIF to mp4");
        Ok(output.to_path_buf())
    }

    /// Mux separate video and audio tracks into one mp4 container
    ///
    /// Streams are copied, not re-encoded.
    pub async fn mux_av(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        timeout: Duration,
    ) -> Result<PathBuf> {
        let args = [
            "-y",
            "-i",
            &video.display().to_string(),
            "-i",
            &audio.display().to_string(),
            "-c",
            "copy",
            "-movflags",
            "faststart",
            &output.display().to_string(),
        ];
        self.run(&args, timeout).await?;

        if !output.is_file() {
            return Err(Error::ExternalTool(format!(
                "ffmpeg mux produced no file at {}",
                output.display()
            )));
        }
        debug!(output = %output.display(), "muxed audio and video");
        Ok(output.to_path_buf())
    }

    /// Re-encode a video with the given compression parameters
    pub async fn reencode(
        &self,
        input: &Path,
        output: &Path,
        params: EncodeParams,
        timeout: Duration,
    ) -> Result<()> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-i".into(),
            input.display().to_string(),
            "-vcodec".into(),
            "libx264".into(),
            "-crf".into(),
            params.crf.to_string(),
            "-preset".into(),
            "fast".into(),
            "-vf".into(),
            "scale='min(1280,iw)':-2".into(),
            "-acodec".into(),
            "aac".into(),
            "-b:a".into(),
            "96k".into(),
        ];

        if let Some(kbps) = params.max_bitrate_kbps {
            args.push("-maxrate".into());
            args.push(format!("{kbps}k"));
            args.push("-bufsize".into());
            args.push(format!("{}k", kbps * 2));
        }

        args.push(output.display().to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&arg_refs, timeout).await
    }

    /// Run ffmpeg with a wall-clock timeout, killing the child on expiry
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<()> {
        debug!(binary = %self.binary_path.display(), ?args, "spawning ffmpeg");

        let mut child = Command::new(&self.binary_path)
            .args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ExternalTool(format!("failed to spawn ffmpeg: {e}")))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => {
                result.map_err(|e| Error::ExternalTool(format!("ffmpeg wait failed: {e}")))?
            }
            Err(_) => {
                // kill_on_drop reaps the child when the future is dropped
                warn!(timeout = ?timeout, "ffmpeg timed out, killing");
                return Err(Error::ExternalTool(format!(
                    "ffmpeg timed out after {timeout:?}"
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(code = ?output.status.code(), stderr = %stderr.trim(), "ffmpeg failed");
            return Err(Error::ExternalTool(format!(
                "ffmpeg exited with {:?}",
                output.status.code()
            )));
        }

        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_explicit_path() {
        let ffmpeg = Ffmpeg::resolve(Some(Path::new("/opt/ffmpeg/bin/ffmpeg")), true).unwrap();
        assert_eq!(
            ffmpeg.binary_path,
            PathBuf::from("/opt/ffmpeg/bin/ffmpeg")
        );
    }

    #[test]
    fn resolve_without_path_search_or_explicit_is_not_supported() {
        let result = Ffmpeg::resolve(None, false);
        assert!(matches!(result, Err(Error::NotSupported(_))));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let ffmpeg = Ffmpeg::new(PathBuf::from("/nonexistent/ffmpeg-binary-xyz"));
        let err = ffmpeg
            .run(&["-version"], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExternalTool(_)));
    }
}
