//! Media URL resolver
//!
//! Turns a social-video page URL into a direct media URL by querying the
//! upstream metadata API. The upstream returns JSON with up to three
//! candidate fields; selection prefers `hd_video_url`, then
//! `sd_video_url`, then the generic `url`.
//!
//! One outbound call per request, no retries. Upstream failures carry the
//! upstream status code and raw body so the caller can surface them
//! verbatim.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};

/// Fixed upstream metadata endpoint
pub const DEFAULT_API_URL: &str =
    "https://facebook-reel-and-video-downloader.p.rapidapi.com/app/main.php";

/// Host identifier sent alongside the API key
pub const DEFAULT_API_HOST: &str = "facebook-reel-and-video-downloader.p.rapidapi.com";

/// Errors that can occur while resolving a media URL
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("API key must not be empty")]
    MissingApiKey,

    #[error("upstream metadata API returned status {status}")]
    UpstreamStatus { status: u16, body: String },

    #[error("no download link found in the API response")]
    NoMediaFound,

    #[error("upstream metadata response was not valid JSON: {0}")]
    InvalidMetadata(String),

    #[error("upstream metadata call timed out")]
    Timeout,

    #[error("upstream metadata call failed: {0}")]
    Request(String),
}

/// Resolver configuration
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Upstream metadata endpoint URL
    pub api_url: String,
    /// Value for the `x-rapidapi-host` header
    pub api_host: String,
    /// Value for the `x-rapidapi-key` header
    pub api_key: String,
    /// Timeout for the whole metadata call
    pub timeout: Duration,
}

impl ResolverConfig {
    /// Config for the fixed production endpoint with the given key.
    pub fn new(api_key: impl Into<String>) -> Self {
        ResolverConfig {
            api_url: DEFAULT_API_URL.to_string(),
            api_host: DEFAULT_API_HOST.to_string(),
            api_key: api_key.into(),
            timeout: crate::config::DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    /// Override the endpoint URL (used by tests against a mock upstream).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Override the metadata call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// JSON shape of the upstream metadata response.
///
/// All fields are optional; an empty string counts as absent when
/// selecting the media URL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamMetadata {
    pub hd_video_url: Option<String>,
    pub sd_video_url: Option<String>,
    pub url: Option<String>,
}

impl UpstreamMetadata {
    /// Pick the media URL by priority: HD, then SD, then generic.
    pub fn best_url(&self) -> Option<&str> {
        [&self.hd_video_url, &self.sd_video_url, &self.url]
            .into_iter()
            .filter_map(|f| f.as_deref())
            .find(|u| !u.is_empty())
    }
}

/// Resolves page URLs to direct media URLs via the upstream metadata API.
pub struct Resolver {
    client: reqwest::Client,
    config: ResolverConfig,
}

impl Resolver {
    /// Create a new resolver.
    ///
    /// Rejects an empty API key here so a misconfigured process fails at
    /// startup, never mid-request.
    pub fn new(config: ResolverConfig) -> Result<Self, ResolveError> {
        if config.api_key.trim().is_empty() {
            return Err(ResolveError::MissingApiKey);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout)
            .build()
            .map_err(|e| ResolveError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Resolve a page URL to a direct media URL.
    pub async fn resolve(&self, source_url: &str) -> Result<String, ResolveError> {
        let response = self
            .client
            .get(&self.config.api_url)
            .query(&[("url", source_url)])
            .header("x-rapidapi-key", &self.config.api_key)
            .header("x-rapidapi-host", &self.config.api_host)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                target: "resolver",
                status = status.as_u16(),
                body = %snippet(&body),
                "upstream metadata API returned an error"
            );
            return Err(ResolveError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let metadata: UpstreamMetadata = response
            .json()
            .await
            .map_err(|e| ResolveError::InvalidMetadata(e.to_string()))?;

        match metadata.best_url() {
            Some(media_url) => {
                debug!(target: "resolver", %media_url, "resolved media URL");
                Ok(media_url.to_string())
            }
            None => {
                error!(
                    target: "resolver",
                    ?metadata,
                    "no download URL found in metadata response"
                );
                Err(ResolveError::NoMediaFound)
            }
        }
    }
}

/// Map a transport-level reqwest error onto the resolver taxonomy.
fn map_request_error(err: reqwest::Error) -> ResolveError {
    if err.is_timeout() {
        ResolveError::Timeout
    } else {
        ResolveError::Request(err.to_string())
    }
}

/// Truncate a body to 256 characters for log output.
pub(crate) fn snippet(body: &str) -> &str {
    match body.char_indices().nth(256) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(value: serde_json::Value) -> UpstreamMetadata {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_hd_takes_priority() {
        let m = metadata(json!({
            "hd_video_url": "https://cdn.example/hd.mp4",
            "sd_video_url": "https://cdn.example/sd.mp4",
            "url": "https://cdn.example/generic.mp4",
        }));
        assert_eq!(m.best_url(), Some("https://cdn.example/hd.mp4"));
    }

    #[test]
    fn test_sd_over_generic() {
        let m = metadata(json!({
            "sd_video_url": "https://cdn.example/sd.mp4",
            "url": "https://cdn.example/generic.mp4",
        }));
        assert_eq!(m.best_url(), Some("https://cdn.example/sd.mp4"));
    }

    #[test]
    fn test_generic_fallback() {
        let m = metadata(json!({ "url": "https://cdn.example/generic.mp4" }));
        assert_eq!(m.best_url(), Some("https://cdn.example/generic.mp4"));
    }

    #[test]
    fn test_empty_string_counts_as_absent() {
        let m = metadata(json!({
            "hd_video_url": "",
            "sd_video_url": "https://cdn.example/sd.mp4",
        }));
        assert_eq!(m.best_url(), Some("https://cdn.example/sd.mp4"));
    }

    #[test]
    fn test_no_fields_is_none() {
        let m = metadata(json!({ "title": "unrelated" }));
        assert_eq!(m.best_url(), None);

        let all_empty = metadata(json!({
            "hd_video_url": "",
            "sd_video_url": "",
            "url": "",
        }));
        assert_eq!(all_empty.best_url(), None);
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let result = Resolver::new(ResolverConfig::new(""));
        assert!(matches!(result, Err(ResolveError::MissingApiKey)));

        let result = Resolver::new(ResolverConfig::new("   "));
        assert!(matches!(result, Err(ResolveError::MissingApiKey)));
    }

    #[test]
    fn test_config_overrides() {
        let config = ResolverConfig::new("key")
            .with_api_url("http://127.0.0.1:9999/meta")
            .with_timeout(Duration::from_millis(250));
        assert_eq!(config.api_url, "http://127.0.0.1:9999/meta");
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.api_host, DEFAULT_API_HOST);
    }

    #[test]
    fn test_snippet_truncates() {
        let long = "x".repeat(1000);
        assert_eq!(snippet(&long).len(), 256);
        assert_eq!(snippet("short"), "short");
    }
}
