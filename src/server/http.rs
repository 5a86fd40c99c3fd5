//! HTTP server implementation
//!
//! Implements:
//! - Download API (GET /download?url=<sourceUrl>): validate, resolve,
//!   relay, stream
//! - Health check (GET /health)
//! - Request gate middleware (rate limiting, CORS allow-list)
//!
//! Every failure is terminal for its request; the handler maps each
//! pipeline error onto the status/body contract and never retries.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use crate::relay::{MediaStream, Relay, RelayError};
use crate::resolver::{snippet, ResolveError, Resolver};
use crate::server::cors::cors_layer;
use crate::server::ratelimit::{rate_limit_middleware, RateLimitConfig, RateLimiter};

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<Resolver>,
    pub relay: Arc<Relay>,
    /// Gateway start time (Unix timestamp)
    pub start_time: i64,
}

impl AppState {
    pub fn new(resolver: Resolver, relay: Relay) -> Self {
        AppState {
            resolver: Arc::new(resolver),
            relay: Arc::new(relay),
            start_time: chrono::Utc::now().timestamp(),
        }
    }
}

/// Middleware configuration for the HTTP server
#[derive(Debug, Clone)]
pub struct MiddlewareConfig {
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// CORS origin allow-list
    pub allowed_origins: Vec<String>,
    /// Whether to enable rate limiting middleware
    pub enable_rate_limit: bool,
    /// Whether to enable the CORS layer
    pub enable_cors: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        MiddlewareConfig {
            rate_limit: RateLimitConfig::default(),
            allowed_origins: Vec::new(),
            enable_rate_limit: true,
            enable_cors: true,
        }
    }
}

impl MiddlewareConfig {
    /// Create a configuration with all middleware disabled (for testing)
    pub fn none() -> Self {
        MiddlewareConfig {
            rate_limit: RateLimitConfig::default(),
            allowed_origins: Vec::new(),
            enable_rate_limit: false,
            enable_cors: false,
        }
    }
}

/// Create the HTTP router with all endpoints and middleware
pub fn create_router(state: AppState, middleware_config: MiddlewareConfig) -> Router {
    let router: Router<AppState> = Router::new()
        .route("/download", get(download_handler))
        .route("/health", get(health_handler));

    let mut stateless_router: Router = router.with_state(state);

    // Rate limiting middleware (applied before CORS so rejected requests
    // do no further work)
    if middleware_config.enable_rate_limit {
        let limiter = RateLimiter::new(middleware_config.rate_limit);
        stateless_router = stateless_router.layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));
    }

    if middleware_config.enable_cors {
        stateless_router = stateless_router.layer(cors_layer(&middleware_config.allowed_origins));
    }

    stateless_router
}

// ============================================================================
// Health Check
// ============================================================================

/// GET /health - Lightweight liveness probe.
async fn health_handler(State(state): State<AppState>) -> Response {
    let uptime = chrono::Utc::now().timestamp() - state.start_time;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSeconds": uptime,
        })),
    )
        .into_response()
}

// ============================================================================
// Download Handler
// ============================================================================

/// Query parameters for the download endpoint
#[derive(Debug, Deserialize)]
struct DownloadQuery {
    url: Option<String>,
}

/// GET /download?url=<sourceUrl> - Resolve and stream a video.
///
/// Pipeline: validate the query parameter, resolve the page URL to a
/// direct media URL, open the media stream, pipe it to the client.
/// The first failing stage short-circuits with its mapped response.
async fn download_handler(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let source_url = match query.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => {
            return (StatusCode::BAD_REQUEST, "Missing video URL parameter.").into_response();
        }
    };

    let media_url = match state.resolver.resolve(&source_url).await {
        Ok(url) => url,
        Err(err) => return resolve_error_response(err),
    };

    match state.relay.open(&media_url).await {
        Ok(media) => stream_response(media),
        Err(err) => relay_error_response(err),
    }
}

/// Build the streamed 200 response for an open media stream.
///
/// `Content-Length` is set only when the media host sent one; the body
/// is piped through without buffering. A transport error after this
/// point can only be logged - headers are already committed.
fn stream_response(media: MediaStream) -> Response {
    let mut builder = Response::builder().status(StatusCode::OK).header(
        header::CONTENT_DISPOSITION,
        attachment_disposition(&media.filename),
    );

    if let Some(content_type) = &media.content_type {
        if let Ok(value) = HeaderValue::from_str(content_type) {
            builder = builder.header(header::CONTENT_TYPE, value);
        }
    }
    if let Some(content_length) = media.content_length {
        builder = builder.header(header::CONTENT_LENGTH, content_length);
    }

    let stream = media.into_byte_stream().inspect_err(|err| {
        error!(target: "relay", error = %err, "media stream aborted mid-transfer");
    });

    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// `attachment; filename="<name>"` header value, falling back to the
/// default when the upstream name is not a legal header value.
fn attachment_disposition(filename: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"video.mp4\""))
}

/// Map a resolver failure onto the response contract.
fn resolve_error_response(err: ResolveError) -> Response {
    match err {
        ResolveError::UpstreamStatus { status, body } => (
            status_from(status),
            format!("API request failed: {body}"),
        )
            .into_response(),
        ResolveError::NoMediaFound => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "No download link found in the API response.",
        )
            .into_response(),
        ResolveError::InvalidMetadata(detail) => {
            error!(target: "resolver", %detail, "metadata response could not be parsed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred on the server.",
            )
                .into_response()
        }
        ResolveError::Timeout => (
            StatusCode::GATEWAY_TIMEOUT,
            "Upstream metadata request timed out.",
        )
            .into_response(),
        ResolveError::MissingApiKey | ResolveError::Request(_) => {
            error!(target: "resolver", error = %err, "metadata request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred on the server.",
            )
                .into_response()
        }
    }
}

/// Map a relay failure onto the response contract.
fn relay_error_response(err: RelayError) -> Response {
    match err {
        RelayError::FetchStatus { status, body } => {
            warn!(
                target: "relay",
                status,
                body = %snippet(&body),
                "media fetch rejected"
            );
            (status_from(status), format!("Failed to fetch video: {body}")).into_response()
        }
        RelayError::Timeout => {
            (StatusCode::GATEWAY_TIMEOUT, "Video fetch timed out.").into_response()
        }
        RelayError::Request(_) => {
            error!(target: "relay", error = %err, "media fetch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred on the server.",
            )
                .into_response()
        }
    }
}

/// Upstream status codes pass through verbatim; anything unrepresentable
/// degrades to 502.
fn status_from(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
}
