//! CORS allow-list layer
//!
//! Builds a `tower-http` [`CorsLayer`] from the configured origin
//! allow-list. Origins are normalized (lowercased host, default ports
//! elided) before comparison, so `https://example.com:443` and
//! `https://EXAMPLE.com` match the same entry. Requests without an
//! `Origin` header (curl, same-origin) are unaffected.

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::debug;
use url::Url;

/// Build the CORS layer for the gateway's allow-list.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let normalized: HashSet<String> = allowed_origins
        .iter()
        .filter_map(|origin| normalize_origin(origin))
        .collect();
    let allowed = Arc::new(normalized);

    let allow_origin = AllowOrigin::predicate({
        let allowed = Arc::clone(&allowed);
        move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let ok = normalized
                .as_ref()
                .is_some_and(|value| allowed.contains(value));
            debug!(target: "http", raw = ?origin, allowed = ok, "CORS origin check");
            ok
        }
    });

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET])
        .expose_headers([header::CONTENT_DISPOSITION])
}

/// Normalize an origin string to `scheme://host[:port]` with default
/// ports elided. Returns `None` for anything that is not an http(s)
/// origin.
fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };
    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}
