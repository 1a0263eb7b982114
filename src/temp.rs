//! Scoped temporary storage for in-flight downloads
//!
//! Each acquisition owns exactly one [`TempScope`]; temp files are never
//! shared between tasks. The scope's directory is removed when the scope is
//! dropped, which guarantees cleanup on every exit path - success, validation
//! failure, timeout, or panic.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// A scoped temporary directory for one asset acquisition
///
/// Files created inside the scope live exactly as long as the scope value.
pub struct TempScope {
    dir: TempDir,
}

impl TempScope {
    /// Create a new scope with the given directory-name prefix
    pub fn new(prefix: &str) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        debug!(path = %dir.path().display(), "created temp scope");
        Ok(Self { dir })
    }

    /// Path of the scope's directory
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Build a file path inside the scope
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Delete a single file, logging instead of failing
///
/// Used for intermediate artifacts (failed compression attempts, pre-conversion
/// originals) that should not wait for scope teardown.
pub fn cleanup_file(path: &Path) {
    if path.is_file() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove temp file");
        } else {
            debug!(path = %path.display(), "removed temp file");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_directory_is_removed_on_drop() {
        let scope = TempScope::new("courier_test_").unwrap();
        let dir_path = scope.path().to_path_buf();
        let file_path = scope.file("asset.mp4");
        std::fs::write(&file_path, b"data").unwrap();
        assert!(dir_path.exists());

        drop(scope);
        assert!(!dir_path.exists(), "scope dir must be removed with contents");
        assert!(!file_path.exists());
    }

    #[test]
    fn cleanup_file_removes_only_files() {
        let scope = TempScope::new("courier_test_").unwrap();
        let file_path = scope.file("partial.mp4");
        std::fs::write(&file_path, b"data").unwrap();

        cleanup_file(&file_path);
        assert!(!file_path.exists());

        // Directories are left to scope teardown
        cleanup_file(scope.path());
        assert!(scope.path().exists());
    }
}
