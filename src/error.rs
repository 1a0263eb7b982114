//! Error types for media-courier
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Source, Acquire, etc.)
//! - A clear split between per-item failures (returned as `None`/empty by the
//!   components that hit them) and errors that cross component boundaries
//! - Retryability classification via [`crate::retry::IsRetryable`]

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for media-courier operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-courier
///
/// Per-candidate failures (a single asset failing to resolve, download, or
/// upload) deliberately do not surface as this type beyond the component that
/// hit them; they are logged and the candidate is dropped. Variants here cover
/// failures that a caller can meaningfully react to.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_file_size_bytes")
        key: Option<String>,
    },

    /// Feed provider client could not be initialized (fatal for the run)
    #[error("provider initialization failed: {0}")]
    ProviderInit(String),

    /// Source-level error (source missing, access denied)
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Asset acquisition error (download, compression, upload)
    #[error("acquisition error: {0}")]
    Acquire(#[from] AcquireError),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (ffmpeg, yt-dlp)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, feature unavailable)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Source-level errors
///
/// These exclude a single source from the current batch; they never abort the
/// overall fetch.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The named source does not exist
    #[error("source '{name}' does not exist")]
    NotFound {
        /// The source name that could not be found
        name: String,
    },

    /// Access to the source is restricted
    #[error("access to source '{name}' is restricted")]
    AccessDenied {
        /// The source name that denied access
        name: String,
    },

    /// Listing or search request failed
    #[error("fetch from source '{name}' failed: {reason}")]
    FetchFailed {
        /// The source name whose fetch failed
        name: String,
        /// The underlying failure description
        reason: String,
    },
}

/// Asset acquisition errors (download, validate, compress, upload)
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Remote download failed
    #[error("download failed for {url}: {reason}")]
    DownloadFailed {
        /// The URL that failed to download
        url: String,
        /// The underlying failure description
        reason: String,
    },

    /// Downloaded or resolved file is missing or empty
    #[error("invalid file at {path}")]
    InvalidFile {
        /// The path that failed validation
        path: PathBuf,
    },

    /// File exceeds the hard processing ceiling and is not worth re-encoding
    #[error("file too large to process: {size} bytes > {limit} bytes")]
    TooLarge {
        /// Actual file size in bytes
        size: u64,
        /// The hard ceiling in bytes
        limit: u64,
    },

    /// All compression attempts produced files over the delivery budget
    #[error("compression failed for {path} after {attempts} attempts")]
    CompressionFailed {
        /// The file that could not be compressed under budget
        path: PathBuf,
        /// Number of re-encode attempts made
        attempts: u32,
    },

    /// The delivery channel signalled a timeout
    ///
    /// This is the only upload failure eligible for retry.
    #[error("upload timed out")]
    UploadTimedOut,

    /// The delivery channel rejected the upload for a non-timeout reason
    #[error("upload failed: {reason}")]
    UploadFailed {
        /// The underlying failure description
        reason: String,
    },

    /// No sender exists for the file's container extension
    #[error("unsupported media type for {path}")]
    UnsupportedMediaType {
        /// The path whose extension matched no sender
        path: PathBuf,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_display_includes_name() {
        let err = SourceError::NotFound {
            name: "pics".to_string(),
        };
        assert!(err.to_string().contains("pics"));

        let err = SourceError::AccessDenied {
            name: "private".to_string(),
        };
        assert!(err.to_string().contains("restricted"));
    }

    #[test]
    fn acquire_error_converts_into_error() {
        let err: Error = AcquireError::UploadTimedOut.into();
        assert!(matches!(err, Error::Acquire(AcquireError::UploadTimedOut)));
    }

    #[test]
    fn too_large_display_carries_sizes() {
        let err = AcquireError::TooLarge {
            size: 200,
            limit: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("200"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn io_error_converts_via_from() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
