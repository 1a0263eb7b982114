//! Feed provider abstraction
//!
//! The feed source is an external collaborator. This module defines the
//! consumed contract ([`SourceProvider`]) and a lazily initialized,
//! dependency-injected handle ([`ProviderHandle`]) that replaces the
//! process-wide client singleton pattern: initialization happens once, guarded
//! by a lock, and the handle is passed explicitly into components.

use crate::error::{Error, Result};
use crate::types::{Candidate, SortMode, TimeWindow};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Contract consumed from the feed provider
///
/// Implementations must isolate their own transport details; all methods carry
/// explicit timeouts internally. Per-source failures are returned as
/// [`crate::error::SourceError`] wrapped in [`Error::Source`]; the fetcher
/// treats them as "exclude this source", never as fatal.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Confirm the named source exists and is accessible
    async fn validate(&self, source: &str) -> Result<()>;

    /// List posts from a source with the given sort mode and optional time window
    async fn fetch_sorted(
        &self,
        source: &str,
        sort: SortMode,
        window: Option<TimeWindow>,
        limit: usize,
    ) -> Result<Vec<Candidate>>;

    /// Search posts in a source by query
    async fn search(
        &self,
        source: &str,
        query: &str,
        sort: SortMode,
        window: Option<TimeWindow>,
        limit: usize,
    ) -> Result<Vec<Candidate>>;
}

/// Factory future type for provider construction
type ProviderFactory = Box<
    dyn Fn() -> Pin<Box<dyn Future<Output = Result<Arc<dyn SourceProvider>>> + Send>>
        + Send
        + Sync,
>;

/// How long provider construction may take before the run is aborted
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lazily initialized provider handle
///
/// Construction of the underlying client (authentication, connection setup)
/// is deferred until first use and performed at most once; concurrent callers
/// wait on the same initialization.
pub struct ProviderHandle {
    cell: OnceCell<Arc<dyn SourceProvider>>,
    factory: ProviderFactory,
}

impl ProviderHandle {
    /// Create a handle from an async factory
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn SourceProvider>>> + Send + 'static,
    {
        Self {
            cell: OnceCell::new(),
            factory: Box::new(move || Box::pin(factory())),
        }
    }

    /// Create a handle around an already-constructed provider
    ///
    /// Useful for tests and for consumers that manage client lifecycle
    /// themselves.
    pub fn from_provider(provider: Arc<dyn SourceProvider>) -> Self {
        let cell = OnceCell::new();
        // A fresh cell accepts exactly one value; this cannot fail here.
        let _ = cell.set(provider);
        Self {
            cell,
            factory: Box::new(|| {
                Box::pin(async {
                    Err(Error::ProviderInit(
                        "provider handle was pre-initialized".to_string(),
                    ))
                })
            }),
        }
    }

    /// Get the provider, initializing it on first use
    ///
    /// Initialization failure (including timeout) is fatal for the run and
    /// surfaces as [`Error::ProviderInit`].
    pub async fn get(&self) -> Result<Arc<dyn SourceProvider>> {
        let provider = self
            .cell
            .get_or_try_init(|| async {
                match tokio::time::timeout(INIT_TIMEOUT, (self.factory)()).await {
                    Ok(Ok(provider)) => Ok(provider),
                    Ok(Err(e)) => Err(Error::ProviderInit(e.to_string())),
                    Err(_) => Err(Error::ProviderInit(
                        "client initialization timed out".to_string(),
                    )),
                }
            })
            .await?;
        Ok(provider.clone())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NullProvider;

    #[async_trait]
    impl SourceProvider for NullProvider {
        async fn validate(&self, _source: &str) -> Result<()> {
            Ok(())
        }

        async fn fetch_sorted(
            &self,
            _source: &str,
            _sort: SortMode,
            _window: Option<TimeWindow>,
            _limit: usize,
        ) -> Result<Vec<Candidate>> {
            Ok(vec![])
        }

        async fn search(
            &self,
            _source: &str,
            _query: &str,
            _sort: SortMode,
            _window: Option<TimeWindow>,
            _limit: usize,
        ) -> Result<Vec<Candidate>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn factory_runs_exactly_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let handle = ProviderHandle::new(move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(NullProvider) as Arc<dyn SourceProvider>)
            }
        });

        let first = handle.get().await;
        let second = handle.get().await;
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn factory_failure_surfaces_as_provider_init() {
        let handle = ProviderHandle::new(|| async {
            Err(Error::Other("auth rejected".to_string()))
        });

        let err = handle.get().await.err().unwrap();
        assert!(matches!(err, Error::ProviderInit(_)));
    }

    #[tokio::test]
    async fn pre_initialized_handle_returns_provider() {
        let handle = ProviderHandle::from_provider(Arc::new(NullProvider));
        assert!(handle.get().await.is_ok());
    }
}
