//! Direct-media relay
//!
//! Fetches a resolved media URL and hands back the response headers the
//! gateway forwards plus the unconsumed byte stream:
//! - redirect following enabled (the media host may bounce through CDNs)
//! - `Content-Type` and `Content-Length` copied only when present
//! - download filename derived from `Content-Disposition`, defaulting to
//!   `video.mp4`
//!
//! The body is never buffered in full; the HTTP layer pipes it straight
//! to the client.

use std::sync::LazyLock;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, error};

use crate::resolver::snippet;

/// Filename used when the media host sends no usable disposition
pub const DEFAULT_FILENAME: &str = "video.mp4";

/// Maximum redirect hops before the fetch is treated as failed
pub const MAX_REDIRECTS: usize = 10;

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"filename="([^"]+)""#).unwrap());

/// Errors that can occur while opening a media stream
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("media host returned status {status}")]
    FetchStatus { status: u16, body: String },

    #[error("media fetch timed out")]
    Timeout,

    #[error("media fetch failed: {0}")]
    Request(String),
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Timeout covering the whole media transfer
    pub timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            timeout: crate::config::DEFAULT_RELAY_TIMEOUT,
        }
    }
}

impl RelayConfig {
    /// Override the media fetch timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An open media stream: forwardable headers plus the body.
pub struct MediaStream {
    /// Upstream `Content-Type`, verbatim, when present
    pub content_type: Option<String>,
    /// Upstream `Content-Length`, when present (never synthesized)
    pub content_length: Option<u64>,
    /// Download filename for the outbound `Content-Disposition`
    pub filename: String,
    response: reqwest::Response,
}

impl MediaStream {
    /// Consume the stream, yielding body chunks as they arrive.
    pub fn into_byte_stream(self) -> impl Stream<Item = Result<Bytes, reqwest::Error>> {
        self.response.bytes_stream()
    }
}

/// Fetches resolved media URLs and exposes them as [`MediaStream`]s.
pub struct Relay {
    client: reqwest::Client,
}

impl Relay {
    /// Create a new relay.
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| RelayError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// GET the media URL and open the byte stream.
    ///
    /// Returns with the body unconsumed; a non-2xx final status (after
    /// redirects) reads the error body instead and fails.
    pub async fn open(&self, media_url: &str) -> Result<MediaStream, RelayError> {
        let response = self
            .client
            .get(media_url)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                target: "relay",
                status = status.as_u16(),
                body = %snippet(&body),
                "media host returned an error"
            );
            return Err(RelayError::FetchStatus {
                status: status.as_u16(),
                body,
            });
        }

        let headers = response.headers();
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_length = headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let filename = headers
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string());

        debug!(
            target: "relay",
            content_type = ?content_type,
            content_length = ?content_length,
            %filename,
            "media stream opened"
        );

        Ok(MediaStream {
            content_type,
            content_length,
            filename,
            response,
        })
    }
}

/// Extract a quoted filename from a `Content-Disposition` header value.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    FILENAME_RE
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Map a transport-level reqwest error onto the relay taxonomy.
fn map_request_error(err: reqwest::Error) -> RelayError {
    if err.is_timeout() {
        RelayError::Timeout
    } else if err.is_redirect() {
        // Redirect loops exhaust the hop bound rather than hanging
        RelayError::Request(format!("too many redirects: {err}"))
    } else {
        RelayError::Request(err.to_string())
    }
}
