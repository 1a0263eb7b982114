//! Size validation and iterative compression
//!
//! Validates a media file against the delivery budget and, when oversized,
//! re-encodes it with progressively tighter parameters until it fits or the
//! attempt budget runs out. Never hands back a file over budget: an input that
//! cannot be brought under the limit is rejected and the candidate dropped.

use crate::config::MediaConfig;
use crate::error::{AcquireError, Error, Result};
use crate::ffmpeg::{EncodeParams, Ffmpeg};
use crate::temp::cleanup_file;
use std::path::Path;
use tracing::{debug, info, warn};

/// Starting constant rate factor for the first pass
const INITIAL_CRF: u32 = 28;
/// CRF is never pushed past this, quality floors matter more than fit
const MAX_CRF: u32 = 32;
/// Bitrate ceiling applied from the second pass on, in kbps
const INITIAL_MAX_BITRATE: u32 = 2500;
/// Bitrate ceiling never drops below this
const MIN_MAX_BITRATE: u32 = 1500;
/// Ceiling reduction per pass in kbps
const BITRATE_STEP: u32 = 300;

/// Size validator and compressor for acquired media files
pub struct SizeCompressor {
    ffmpeg: Ffmpeg,
    config: MediaConfig,
}

impl SizeCompressor {
    /// Create a compressor with the given transcoder handle and media settings
    pub fn new(ffmpeg: Ffmpeg, config: MediaConfig) -> Self {
        Self { ffmpeg, config }
    }

    /// Ensure the file at `path` fits the delivery budget, re-encoding in place
    /// if necessary
    ///
    /// Returns the final size in bytes. Errors mean the file was rejected; the
    /// caller is expected to drop the candidate (the input file itself is left
    /// to scope teardown).
    pub async fn fit(&self, path: &Path) -> Result<u64> {
        let size = file_size(path)?;

        if size > self.config.hard_size_ceiling_bytes {
            warn!(
                path = %path.display(),
                size = size,
                ceiling = self.config.hard_size_ceiling_bytes,
                "file exceeds hard ceiling, rejecting without compression"
            );
            return Err(Error::Acquire(AcquireError::TooLarge {
                size,
                limit: self.config.hard_size_ceiling_bytes,
            }));
        }

        if size <= self.config.max_file_size_bytes {
            debug!(path = %path.display(), size = size, "file within budget");
            return Ok(size);
        }

        warn!(
            path = %path.display(),
            size = size,
            budget = self.config.max_file_size_bytes,
            "file over budget, compressing"
        );
        self.compress_in_place(path).await
    }

    /// Run the bounded re-encode loop, replacing `path` on success
    async fn compress_in_place(&self, path: &Path) -> Result<u64> {
        let output = scratch_path(path);

        for (attempt, params) in self
            .param_schedule()
            .into_iter()
            .enumerate()
            .map(|(i, p)| (i as u32 + 1, p))
        {
            info!(
                path = %path.display(),
                attempt = attempt,
                crf = params.crf,
                max_bitrate_kbps = ?params.max_bitrate_kbps,
                "compression attempt"
            );

            match self
                .ffmpeg
                .reencode(path, &output, params, self.config.transcode_timeout)
                .await
            {
                Ok(()) => {}
                Err(e) => {
                    warn!(attempt = attempt, error = %e, "compression attempt failed");
                    cleanup_file(&output);
                    continue;
                }
            }

            let new_size = match file_size(&output) {
                Ok(size) => size,
                Err(e) => {
                    warn!(attempt = attempt, error = %e, "compressed output unreadable");
                    cleanup_file(&output);
                    continue;
                }
            };

            if new_size <= self.config.max_file_size_bytes {
                info!(
                    path = %path.display(),
                    size = new_size,
                    attempt = attempt,
                    "compression succeeded"
                );
                std::fs::rename(&output, path)?;
                return Ok(new_size);
            }

            warn!(
                attempt = attempt,
                size = new_size,
                budget = self.config.max_file_size_bytes,
                "still over budget, tightening parameters"
            );
            cleanup_file(&output);
        }

        Err(Error::Acquire(AcquireError::CompressionFailed {
            path: path.to_path_buf(),
            attempts: self.config.compression_attempts,
        }))
    }

    /// Parameter schedule for the configured number of attempts
    ///
    /// Pass 1 is CRF-only; later passes add a bitrate ceiling that shrinks
    /// while CRF grows, both clamped.
    fn param_schedule(&self) -> Vec<EncodeParams> {
        param_schedule(self.config.compression_attempts)
    }
}

/// Build the tightening parameter schedule for `attempts` passes
pub(crate) fn param_schedule(attempts: u32) -> Vec<EncodeParams> {
    let mut schedule = Vec::with_capacity(attempts as usize);
    let mut crf = INITIAL_CRF;
    let mut max_bitrate = INITIAL_MAX_BITRATE;

    for attempt in 0..attempts {
        schedule.push(EncodeParams {
            crf,
            max_bitrate_kbps: (attempt > 0).then_some(max_bitrate),
        });
        crf = (crf + 1).min(MAX_CRF);
        max_bitrate = max_bitrate.saturating_sub(BITRATE_STEP).max(MIN_MAX_BITRATE);
    }

    schedule
}

/// Scratch output path alongside the input (`video.mp4` -> `video_compressed.mp4`)
fn scratch_path(path: &Path) -> std::path::PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "asset".to_string());
    path.with_file_name(format!("{stem}_compressed.mp4"))
}

fn file_size(path: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(path).map_err(|_| {
        Error::Acquire(AcquireError::InvalidFile {
            path: path.to_path_buf(),
        })
    })?;
    Ok(metadata.len())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::temp::TempScope;
    use std::path::PathBuf;

    fn compressor_with_budget(budget: u64) -> SizeCompressor {
        let config = MediaConfig {
            max_file_size_bytes: budget,
            ..MediaConfig::default()
        };
        // Points at a nonexistent binary: any invocation fails, which is what
        // the rejection tests rely on.
        SizeCompressor::new(Ffmpeg::new(PathBuf::from("/nonexistent/ffmpeg")), config)
    }

    #[tokio::test]
    async fn file_under_budget_passes_through() {
        let scope = TempScope::new("compress_test_").unwrap();
        let path = scope.file("small.mp4");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        let size = compressor_with_budget(1000).fit(&path).await.unwrap();
        assert_eq!(size, 100);
        // Content untouched
        assert_eq!(std::fs::read(&path).unwrap().len(), 100);
    }

    #[tokio::test]
    async fn file_over_hard_ceiling_is_rejected_without_attempts() {
        let scope = TempScope::new("compress_test_").unwrap();
        let path = scope.file("huge.mp4");
        std::fs::write(&path, vec![0u8; 500]).unwrap();

        let config = MediaConfig {
            max_file_size_bytes: 100,
            hard_size_ceiling_bytes: 400,
            ..MediaConfig::default()
        };
        let compressor =
            SizeCompressor::new(Ffmpeg::new(PathBuf::from("/nonexistent/ffmpeg")), config);

        let err = compressor.fit(&path).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Acquire(AcquireError::TooLarge { size: 500, limit: 400 })
        ));
    }

    #[tokio::test]
    async fn missing_file_is_invalid() {
        let err = compressor_with_budget(1000)
            .fit(Path::new("/nonexistent/file.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Acquire(AcquireError::InvalidFile { .. })));
    }

    #[tokio::test]
    async fn failed_attempts_reject_rather_than_return_oversized() {
        let scope = TempScope::new("compress_test_").unwrap();
        let path = scope.file("big.mp4");
        std::fs::write(&path, vec![0u8; 200]).unwrap();

        // ffmpeg binary is absent, so every pass fails and the file must be
        // rejected - never returned over budget.
        let err = compressor_with_budget(100).fit(&path).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Acquire(AcquireError::CompressionFailed { attempts: 3, .. })
        ));
        // No stray scratch file left behind
        assert!(!scratch_path(&path).exists());
    }

    #[test]
    fn schedule_tightens_monotonically() {
        let schedule = param_schedule(5);
        assert_eq!(schedule.len(), 5);

        assert_eq!(schedule[0].crf, INITIAL_CRF);
        assert_eq!(schedule[0].max_bitrate_kbps, None);

        for pair in schedule.windows(2) {
            assert!(pair[1].crf >= pair[0].crf);
            if let (Some(a), Some(b)) = (pair[0].max_bitrate_kbps, pair[1].max_bitrate_kbps) {
                assert!(b <= a);
            }
        }

        // Clamps hold even for long schedules
        let last = schedule.last().unwrap();
        assert!(last.crf <= MAX_CRF);
        assert!(last.max_bitrate_kbps.unwrap() >= MIN_MAX_BITRATE);
    }

    #[test]
    fn default_schedule_matches_expected_values() {
        let schedule = param_schedule(3);
        assert_eq!(
            schedule,
            vec![
                EncodeParams {
                    crf: 28,
                    max_bitrate_kbps: None
                },
                EncodeParams {
                    crf: 29,
                    max_bitrate_kbps: Some(2200)
                },
                EncodeParams {
                    crf: 30,
                    max_bitrate_kbps: Some(1900)
                },
            ]
        );
    }

    #[test]
    fn scratch_path_keeps_directory() {
        let path = Path::new("/tmp/work/clip.mp4");
        assert_eq!(
            scratch_path(path),
            PathBuf::from("/tmp/work/clip_compressed.mp4")
        );
    }
}
