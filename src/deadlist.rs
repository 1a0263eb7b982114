//! Persisted dead-link list
//!
//! An append-only set of URLs known to be permanently unresolvable (e.g. the
//! generic downloader reported "not found"). Consulted before resolution so
//! dead links are not re-attempted across runs. Stored as a JSON array of
//! strings; a missing or corrupt file degrades to an empty set.

use crate::error::Result;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Dead-link set with optional file persistence
///
/// When constructed without a path the set is purely in-memory, which keeps
/// the behavior available in tests and for consumers that do not want state
/// on disk.
pub struct DeadLinkList {
    path: Option<PathBuf>,
    entries: Mutex<HashSet<String>>,
}

impl DeadLinkList {
    /// Create an in-memory dead-link list
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(HashSet::new()),
        }
    }

    /// Load the dead-link list from a file, creating an empty set if the file
    /// does not exist or cannot be parsed
    pub async fn load(path: PathBuf) -> Self {
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<String>>(&bytes) {
                Ok(list) => {
                    debug!(count = list.len(), path = %path.display(), "loaded dead-link list");
                    list.into_iter().collect()
                }
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "dead-link list unreadable, starting empty");
                    HashSet::new()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "no dead-link list on disk, starting empty");
                HashSet::new()
            }
        };

        Self {
            path: Some(path),
            entries: Mutex::new(entries),
        }
    }

    /// Check whether a URL is known dead
    pub async fn contains(&self, url: &str) -> bool {
        self.entries.lock().await.contains(url)
    }

    /// Add a URL to the list and persist it
    ///
    /// Persistence failure is logged, not propagated; the in-memory set still
    /// protects the rest of the run.
    pub async fn add(&self, url: &str) {
        // The lock is held across the write so concurrent adds cannot persist
        // a stale snapshot over a newer one
        let mut entries = self.entries.lock().await;
        if !entries.insert(url.to_string()) {
            return;
        }
        info!(url = %url, "added URL to dead-link list");

        let snapshot: Vec<String> = entries.iter().cloned().collect();
        if let Err(e) = self.persist(&snapshot).await {
            warn!(error = %e, "failed to persist dead-link list");
        }
    }

    /// Number of entries currently known
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the list is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn persist(&self, snapshot: &[String]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_list_tracks_entries() {
        let list = DeadLinkList::in_memory();
        assert!(list.is_empty().await);
        assert!(!list.contains("https://clip.example/dead").await);

        list.add("https://clip.example/dead").await;
        assert!(list.contains("https://clip.example/dead").await);
        assert_eq!(list.len().await, 1);

        // Re-adding is a no-op
        list.add("https://clip.example/dead").await;
        assert_eq!(list.len().await, 1);
    }

    #[tokio::test]
    async fn list_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dead_links.json");

        let list = DeadLinkList::load(path.clone()).await;
        list.add("https://a.example/1").await;
        list.add("https://a.example/2").await;

        let reloaded = DeadLinkList::load(path).await;
        assert_eq!(reloaded.len().await, 2);
        assert!(reloaded.contains("https://a.example/1").await);
    }

    #[tokio::test]
    async fn concurrent_adds_all_reach_disk() {
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dead_links.json");
        let list = Arc::new(DeadLinkList::load(path.clone()).await);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let list = list.clone();
                tokio::spawn(async move {
                    list.add(&format!("https://a.example/{i}")).await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        // The file reflects every add, not just whichever snapshot won a race
        let reloaded = DeadLinkList::load(path).await;
        assert_eq!(reloaded.len().await, 8);
        for i in 0..8 {
            assert!(reloaded.contains(&format!("https://a.example/{i}")).await);
        }
    }

    #[tokio::test]
    async fn corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dead_links.json");
        tokio::fs::write(&path, b"not json at all").await.unwrap();

        let list = DeadLinkList::load(path).await;
        assert!(list.is_empty().await);
    }
}
