//! Rate limiting middleware
//!
//! Fixed-window admission control for the download route: at most N
//! accepted requests (default 1) per client IP per window (default one
//! second). Excess requests get a 429 with a static message and never
//! reach the resolver.
//!
//! Features:
//! - Per-client IP counters with an encapsulated store (no globals)
//! - Route-prefix scoping (only listed prefixes are limited)
//! - Atomic check-and-increment under a single lock acquisition
//! - Periodic sweep of stale windows

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Default accepted requests per window
const DEFAULT_MAX_PER_WINDOW: u32 = 1;

/// Default window length
const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Default cleanup interval (remove stale entries)
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Default entry expiry time
const DEFAULT_ENTRY_EXPIRY: Duration = Duration::from_secs(600);

/// Static rejection body
pub const REJECTION_MESSAGE: &str = "Too many requests, please try again later.";

/// Rate limit errors
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Rate limit exceeded")]
    LimitExceeded { retry_after_secs: u64 },
}

/// Fixed-window counter state for a single client
#[derive(Debug, Clone)]
struct WindowCounter {
    /// Start of the current window
    window_start: Instant,
    /// Requests accepted in the current window
    count: u32,
}

impl WindowCounter {
    fn new() -> Self {
        WindowCounter {
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Attempt to admit one request. Read, compare, and increment happen
    /// as one step; the caller holds the store lock.
    fn try_admit(&mut self, max_per_window: u32, window: Duration) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= window {
            self.window_start = now;
            self.count = 0;
        }

        if self.count < max_per_window {
            self.count += 1;
            true
        } else {
            false
        }
    }

    /// Time until the current window rolls over.
    fn time_until_reset(&self, window: Duration) -> Duration {
        window.saturating_sub(self.window_start.elapsed())
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Accepted requests per client per window
    pub max_per_window: u32,
    /// Window length
    pub window: Duration,
    /// Route prefixes the limiter applies to; other paths pass freely
    pub limited_prefixes: Vec<String>,
    /// Whether rate limiting is enabled
    pub enabled: bool,
    /// Trusted proxy headers for client IP extraction
    pub trust_proxy_headers: bool,
    /// Cleanup interval for stale entries
    pub cleanup_interval: Duration,
    /// Entry expiry time
    pub entry_expiry: Duration,
    /// Exempt IPs
    pub exempt_ips: Vec<IpAddr>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_per_window: DEFAULT_MAX_PER_WINDOW,
            window: DEFAULT_WINDOW,
            limited_prefixes: vec!["/download".to_string()],
            enabled: true,
            trust_proxy_headers: false,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            entry_expiry: DEFAULT_ENTRY_EXPIRY,
            exempt_ips: Vec::new(),
        }
    }
}

impl RateLimitConfig {
    /// Create a builder for custom configuration
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::default()
    }

    /// Whether the limiter applies to a given path
    pub fn is_limited_path(&self, path: &str) -> bool {
        self.limited_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Check if an IP is exempt from rate limiting
    pub fn is_exempt(&self, ip: &IpAddr) -> bool {
        self.exempt_ips.contains(ip)
    }
}

/// Builder for RateLimitConfig
#[derive(Default)]
pub struct RateLimitConfigBuilder {
    config: RateLimitConfig,
}

impl RateLimitConfigBuilder {
    /// Set accepted requests per window
    pub fn max_per_window(mut self, max: u32) -> Self {
        self.config.max_per_window = max;
        self
    }

    /// Set the window length
    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    /// Set the limited route prefixes (replaces existing)
    pub fn limited_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.config.limited_prefixes = prefixes;
        self
    }

    /// Enable or disable rate limiting
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Trust proxy headers for client IP
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.config.trust_proxy_headers = trust;
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Set entry expiry
    pub fn entry_expiry(mut self, expiry: Duration) -> Self {
        self.config.entry_expiry = expiry;
        self
    }

    /// Add exempt IPs
    pub fn exempt_ips(mut self, ips: Vec<IpAddr>) -> Self {
        self.config.exempt_ips = ips;
        self
    }

    /// Build the configuration
    pub fn build(self) -> RateLimitConfig {
        self.config
    }
}

/// Client counter entry with expiry tracking
#[derive(Debug)]
struct ClientEntry {
    counter: WindowCounter,
    last_seen: Instant,
}

/// Rate limiter state
#[derive(Clone)]
pub struct RateLimiter {
    /// Per-client counters keyed by IP
    counters: Arc<RwLock<HashMap<IpAddr, ClientEntry>>>,
    /// Configuration
    config: Arc<RateLimitConfig>,
    /// Last cleanup time
    last_cleanup: Arc<RwLock<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimitConfig) -> Self {
        RateLimiter {
            counters: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
            last_cleanup: Arc::new(RwLock::new(Instant::now())),
        }
    }

    /// Check if a request is allowed
    pub fn check(&self, client_ip: IpAddr, path: &str) -> Result<(), RateLimitError> {
        if !self.config.enabled || !self.config.is_limited_path(path) {
            return Ok(());
        }

        if self.config.is_exempt(&client_ip) {
            return Ok(());
        }

        self.maybe_cleanup();

        let mut counters = self.counters.write();
        let entry = counters.entry(client_ip).or_insert_with(|| ClientEntry {
            counter: WindowCounter::new(),
            last_seen: Instant::now(),
        });

        entry.last_seen = Instant::now();

        if entry
            .counter
            .try_admit(self.config.max_per_window, self.config.window)
        {
            Ok(())
        } else {
            let retry_after = entry.counter.time_until_reset(self.config.window);
            Err(RateLimitError::LimitExceeded {
                retry_after_secs: retry_after.as_secs().max(1),
            })
        }
    }

    /// Maybe run cleanup of stale entries
    fn maybe_cleanup(&self) {
        let mut last_cleanup = self.last_cleanup.write();
        if last_cleanup.elapsed() < self.config.cleanup_interval {
            return;
        }

        *last_cleanup = Instant::now();
        drop(last_cleanup);

        let mut counters = self.counters.write();
        let expiry = self.config.entry_expiry;
        counters.retain(|_, entry| entry.last_seen.elapsed() < expiry);

        debug!(target: "http", "Rate limiter cleanup: {} entries remaining", counters.len());
    }

    /// Get the configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

/// Extract client IP from request
fn extract_client_ip(
    remote_addr: Option<SocketAddr>,
    headers: &axum::http::HeaderMap,
    trust_proxy: bool,
) -> Option<IpAddr> {
    // If trusting proxy headers, check X-Forwarded-For first
    if trust_proxy {
        if let Some(xff) = headers.get("x-forwarded-for") {
            if let Ok(xff_str) = xff.to_str() {
                // Take the first (leftmost) IP, which is the original client
                if let Some(ip_str) = xff_str.split(',').next() {
                    if let Ok(ip) = ip_str.trim().parse::<IpAddr>() {
                        return Some(ip);
                    }
                }
            }
        }

        if let Some(real_ip) = headers.get("x-real-ip") {
            if let Ok(ip_str) = real_ip.to_str() {
                if let Ok(ip) = ip_str.trim().parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    // Fall back to direct connection address
    remote_addr.map(|addr| addr.ip())
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    limiter: axum::extract::State<RateLimiter>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let config = limiter.config();

    if !config.enabled {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let headers = request.headers();
    let remote_addr = connect_info.map(|ci| ci.0);

    let client_ip = match extract_client_ip(remote_addr, headers, config.trust_proxy_headers) {
        Some(ip) => ip,
        None => {
            // Can't determine client IP - allow request but log warning
            warn!(target: "http", "Rate limit: Could not determine client IP");
            return next.run(request).await;
        }
    };

    match limiter.check(client_ip, &path) {
        Ok(()) => next.run(request).await,
        Err(RateLimitError::LimitExceeded { retry_after_secs }) => {
            warn!(target: "http", %client_ip, %path, "rate limit exceeded");
            rate_limit_exceeded_response(retry_after_secs)
        }
    }
}

/// Generate rate limit exceeded response
fn rate_limit_exceeded_response(retry_after_secs: u64) -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::RETRY_AFTER, retry_after_secs.to_string()),
        ],
        REJECTION_MESSAGE,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::thread::sleep;

    fn test_config(window: Duration) -> RateLimitConfig {
        RateLimitConfig {
            max_per_window: 1,
            window,
            limited_prefixes: vec!["/download".to_string()],
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_window_counter_admits_up_to_max() {
        let mut counter = WindowCounter::new();
        let window = Duration::from_secs(60);

        assert!(counter.try_admit(2, window));
        assert!(counter.try_admit(2, window));
        assert!(!counter.try_admit(2, window));
    }

    #[test]
    fn test_window_counter_resets_after_window() {
        let mut counter = WindowCounter::new();
        let window = Duration::from_millis(30);

        assert!(counter.try_admit(1, window));
        assert!(!counter.try_admit(1, window));

        sleep(Duration::from_millis(40));
        assert!(counter.try_admit(1, window));
    }

    #[test]
    fn test_one_request_per_window() {
        let limiter = RateLimiter::new(test_config(Duration::from_secs(60)));
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));

        assert!(limiter.check(ip, "/download").is_ok());
        assert!(limiter.check(ip, "/download").is_err());
        assert!(limiter.check(ip, "/download").is_err());
    }

    #[test]
    fn test_new_window_admits_again() {
        let limiter = RateLimiter::new(test_config(Duration::from_millis(30)));
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));

        assert!(limiter.check(ip, "/download").is_ok());
        assert!(limiter.check(ip, "/download").is_err());

        sleep(Duration::from_millis(40));
        assert!(limiter.check(ip, "/download").is_ok());
    }

    #[test]
    fn test_per_ip_isolation() {
        let limiter = RateLimiter::new(test_config(Duration::from_secs(60)));
        let ip1 = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
        let ip2 = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2));

        assert!(limiter.check(ip1, "/download").is_ok());
        assert!(limiter.check(ip1, "/download").is_err());

        // Second client has its own window
        assert!(limiter.check(ip2, "/download").is_ok());
    }

    #[test]
    fn test_unlimited_paths_pass() {
        let limiter = RateLimiter::new(test_config(Duration::from_secs(60)));
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));

        for _ in 0..50 {
            assert!(limiter.check(ip, "/health").is_ok());
        }

        // The download window is untouched by health traffic
        assert!(limiter.check(ip, "/download").is_ok());
        assert!(limiter.check(ip, "/download").is_err());
    }

    #[test]
    fn test_exempt_ips() {
        let exempt = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let config = RateLimitConfig {
            exempt_ips: vec![exempt],
            ..test_config(Duration::from_secs(60))
        };
        let limiter = RateLimiter::new(config);

        for _ in 0..10 {
            assert!(limiter.check(exempt, "/download").is_ok());
        }
    }

    #[test]
    fn test_disabled_limiter_allows_everything() {
        let config = RateLimitConfig {
            enabled: false,
            ..test_config(Duration::from_secs(60))
        };
        let limiter = RateLimiter::new(config);
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));

        for _ in 0..100 {
            assert!(limiter.check(ip, "/download").is_ok());
        }
    }

    #[test]
    fn test_retry_after_at_least_one_second() {
        let limiter = RateLimiter::new(test_config(Duration::from_secs(1)));
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));

        limiter.check(ip, "/download").unwrap();
        match limiter.check(ip, "/download") {
            Err(RateLimitError::LimitExceeded { retry_after_secs }) => {
                assert!(retry_after_secs >= 1);
            }
            other => panic!("expected LimitExceeded, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_config_builder() {
        let config = RateLimitConfig::builder()
            .max_per_window(5)
            .window(Duration::from_secs(10))
            .limited_prefixes(vec!["/api/".to_string()])
            .trust_proxy_headers(true)
            .build();

        assert_eq!(config.max_per_window, 5);
        assert_eq!(config.window, Duration::from_secs(10));
        assert!(config.is_limited_path("/api/foo"));
        assert!(!config.is_limited_path("/download"));
        assert!(config.trust_proxy_headers);
    }

    #[test]
    fn test_extract_client_ip_direct() {
        let headers = axum::http::HeaderMap::new();
        let addr = Some(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
            12345,
        ));

        let ip = extract_client_ip(addr, &headers, false);
        assert_eq!(ip, Some(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))));
    }

    #[test]
    fn test_extract_client_ip_xff() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.50, 70.41.3.18".parse().unwrap(),
        );
        let addr = Some(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            12345,
        ));

        // Without trust, should use direct address
        let ip = extract_client_ip(addr, &headers, false);
        assert_eq!(ip, Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));

        // With trust, should use XFF
        let ip = extract_client_ip(addr, &headers, true);
        assert_eq!(ip, Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 50))));
    }

    #[test]
    fn test_extract_client_ip_real_ip() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.100".parse().unwrap());
        let addr = Some(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            12345,
        ));

        let ip = extract_client_ip(addr, &headers, true);
        assert_eq!(ip, Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 100))));
    }
}
