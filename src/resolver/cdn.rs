//! JSON-metadata CDN providers
//!
//! Two hosts expose a public metadata API keyed by the shortcode in the page
//! URL. Resolution fetches the JSON, extracts the highest-quality asset URL,
//! and rewrites protocol-relative URLs to absolute before handing back a
//! remote asset for the normal download path.

use super::MediaLinkResolver;
use crate::types::ResolvedAsset;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct StreamableResponse {
    #[serde(default)]
    files: StreamableFiles,
}

#[derive(Debug, Default, Deserialize)]
struct StreamableFiles {
    mp4: Option<StreamableFile>,
}

#[derive(Debug, Deserialize)]
struct StreamableFile {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RedgifsResponse {
    gif: Option<RedgifsGif>,
}

#[derive(Debug, Deserialize)]
struct RedgifsGif {
    #[serde(default)]
    urls: RedgifsUrls,
}

#[derive(Debug, Default, Deserialize)]
struct RedgifsUrls {
    hd: Option<String>,
    sd: Option<String>,
}

impl MediaLinkResolver {
    /// Resolve a Streamable page URL via its metadata API
    pub(super) async fn resolve_streamable(&self, url: &str) -> Option<ResolvedAsset> {
        let code = shortcode(url)?;
        let api_url = format!("{}/{}", self.streamable_api, urlencoding::encode(&code));

        let body: StreamableResponse = self.fetch_metadata(&api_url, url).await?;
        let Some(asset) = body.files.mp4.and_then(|f| f.url) else {
            warn!(url = %url, "no mp4 asset in metadata response");
            return None;
        };

        let resolved = absolutize(asset.trim());
        info!(url = %url, resolved = %resolved, "resolved via metadata API");
        Some(ResolvedAsset::Remote(resolved))
    }

    /// Resolve a Redgifs watch URL via its metadata API
    pub(super) async fn resolve_redgifs(&self, url: &str) -> Option<ResolvedAsset> {
        let code = shortcode(url)?;
        let api_url = format!("{}/{}", self.redgifs_api, urlencoding::encode(&code));

        let body: RedgifsResponse = self.fetch_metadata(&api_url, url).await?;
        let Some(asset) = body.gif.and_then(|g| g.urls.hd.or(g.urls.sd)) else {
            warn!(url = %url, "no downloadable asset in metadata response");
            return None;
        };

        let resolved = absolutize(asset.trim());
        info!(url = %url, resolved = %resolved, "resolved via metadata API");
        Some(ResolvedAsset::Remote(resolved))
    }

    /// GET and deserialize a metadata document, logging instead of failing
    async fn fetch_metadata<T: serde::de::DeserializeOwned>(
        &self,
        api_url: &str,
        page_url: &str,
    ) -> Option<T> {
        let response = match tokio::time::timeout(
            self.media.probe_timeout,
            self.http.get(api_url).send(),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(url = %page_url, error = %e, "metadata request failed");
                return None;
            }
            Err(_) => {
                warn!(url = %page_url, "metadata request timed out");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(url = %page_url, status = %status, "metadata API rejected request");
            return None;
        }

        match response.json::<T>().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(url = %page_url, error = %e, "metadata response unparseable");
                None
            }
        }
    }
}

/// Last path segment of the page URL, without query or trailing slash
fn shortcode(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit('/').next()?;
    let code = last.split('?').next()?;
    if code.is_empty() {
        return None;
    }
    Some(code.to_string())
}

/// Rewrite protocol-relative or scheme-less URLs to https
fn absolutize(url: &str) -> String {
    if url.starts_with("http") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("https:{url}")
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::super::tests::resolver;
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn shortcode_strips_query_and_slash() {
        assert_eq!(
            shortcode("https://streamable.com/abcd"),
            Some("abcd".to_string())
        );
        assert_eq!(
            shortcode("https://streamable.com/abcd/?t=1"),
            Some("abcd".to_string())
        );
        assert_eq!(
            shortcode("https://www.redgifs.com/watch/someclip?ref=x"),
            Some("someclip".to_string())
        );
    }

    #[test]
    fn absolutize_rewrites_relative_forms() {
        assert_eq!(
            absolutize("https://cdn.example.com/a.mp4"),
            "https://cdn.example.com/a.mp4"
        );
        assert_eq!(
            absolutize("//cdn.example.com/a.mp4"),
            "https://cdn.example.com/a.mp4"
        );
        assert_eq!(
            absolutize("/video/mp4/a.mp4?token=x"),
            "https:/video/mp4/a.mp4?token=x"
        );
    }

    #[tokio::test]
    async fn streamable_extracts_mp4_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos/abcd"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"files":{"mp4":{"url":"//cdn.example.com/video/abcd.mp4"}}}"#,
            ))
            .mount(&server)
            .await;

        let resolver = resolver().with_api_bases(
            format!("{}/videos", server.uri()),
            "http://unused.invalid".to_string(),
        );

        let resolved = resolver
            .resolve_streamable("https://streamable.com/abcd")
            .await;
        assert_eq!(
            resolved,
            Some(ResolvedAsset::Remote(
                "https://cdn.example.com/video/abcd.mp4".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn streamable_missing_mp4_is_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos/abcd"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"files":{}}"#))
            .mount(&server)
            .await;

        let resolver = resolver().with_api_bases(
            format!("{}/videos", server.uri()),
            "http://unused.invalid".to_string(),
        );
        assert!(
            resolver
                .resolve_streamable("https://streamable.com/abcd")
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn streamable_api_error_is_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos/abcd"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let resolver = resolver().with_api_bases(
            format!("{}/videos", server.uri()),
            "http://unused.invalid".to_string(),
        );
        assert!(
            resolver
                .resolve_streamable("https://streamable.com/abcd")
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn redgifs_prefers_hd_over_sd() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gifs/someclip"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"gif":{"urls":{"hd":"https://media.example.com/hd.mp4","sd":"https://media.example.com/sd.mp4"}}}"#,
            ))
            .mount(&server)
            .await;

        let resolver = resolver().with_api_bases(
            "http://unused.invalid".to_string(),
            format!("{}/gifs", server.uri()),
        );

        let resolved = resolver
            .resolve_redgifs("https://www.redgifs.com/watch/someclip")
            .await;
        assert_eq!(
            resolved,
            Some(ResolvedAsset::Remote(
                "https://media.example.com/hd.mp4".to_string()
            ))
        );
    }
}
