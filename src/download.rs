//! Streaming HTTP download and existence-probe helpers
//!
//! Shared by the resolver (quality-tier probes, track downloads) and the
//! acquirer (final asset download). Downloads stream to disk in chunks under
//! one overall wall-clock timeout so a stalled transfer cannot hold an
//! acquisition slot indefinitely.

use crate::error::{AcquireError, Error, Result};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Download `url` to `path`, returning the number of bytes written
///
/// The timeout covers the whole transfer, not individual chunks. Non-2xx
/// responses and timeouts surface as [`AcquireError::DownloadFailed`].
pub async fn download_file(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
    timeout: Duration,
) -> Result<u64> {
    match tokio::time::timeout(timeout, stream_to_file(client, url, path)).await {
        Ok(result) => result,
        Err(_) => {
            crate::temp::cleanup_file(path);
            Err(Error::Acquire(AcquireError::DownloadFailed {
                url: url.to_string(),
                reason: format!("timed out after {timeout:?}"),
            }))
        }
    }
}

async fn stream_to_file(client: &reqwest::Client, url: &str, path: &Path) -> Result<u64> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Acquire(AcquireError::DownloadFailed {
            url: url.to_string(),
            reason: format!("status {status}"),
        }));
    }

    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    debug!(url = %url, bytes = written, path = %path.display(), "downloaded file");
    Ok(written)
}

/// Check whether `url` answers 200 within the timeout
///
/// Probes use GET rather than HEAD; some media CDNs reject HEAD on asset URLs
/// while serving GET fine. The body is not read.
pub async fn probe(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, client.get(url).send()).await {
        Ok(Ok(response)) => {
            let ok = response.status().is_success();
            debug!(url = %url, status = %response.status(), "probed url");
            ok
        }
        Ok(Err(e)) => {
            debug!(url = %url, error = %e, "probe request failed");
            false
        }
        Err(_) => {
            warn!(url = %url, "probe timed out");
            false
        }
    }
}

/// Lowercased extension of a URL's path component, without the dot
///
/// Query strings and fragments are ignored. Returns `None` for URLs that do
/// not parse or whose path has no extension.
pub fn url_extension(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let path = parsed.path();
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
