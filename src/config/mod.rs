//! Gateway configuration
//!
//! All runtime configuration comes from environment variables, resolved
//! once at startup:
//! - `RAPIDAPI_KEY` - upstream metadata API key (required; startup fails without it)
//! - `PORT` - listen port (default 3000)
//! - `ALLOWED_ORIGINS` - comma-separated CORS origin allow-list
//!
//! The loaded [`Config`] is threaded through constructors explicitly;
//! nothing reads the environment after startup.

use std::time::Duration;

use thiserror::Error;

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Default CORS origin allow-list
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:7700";

/// Default timeout for the upstream metadata call
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for the direct-media fetch (covers the whole transfer)
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration errors (fatal at startup)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("RAPIDAPI_KEY environment variable is not set")]
    MissingApiKey,

    #[error("invalid PORT value '{0}'")]
    InvalidPort(String),
}

/// Resolved gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream metadata API key
    pub api_key: String,
    /// Listen port
    pub port: u16,
    /// CORS origin allow-list
    pub allowed_origins: Vec<String>,
    /// Timeout for the upstream metadata call
    pub resolve_timeout: Duration,
    /// Timeout for the direct-media fetch
    pub relay_timeout: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Fails fast when the upstream API key is unset so the process never
    /// serves a request it cannot complete.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("RAPIDAPI_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };

        let allowed_origins = parse_origin_list(
            lookup("ALLOWED_ORIGINS")
                .as_deref()
                .unwrap_or(DEFAULT_ALLOWED_ORIGINS),
        );

        Ok(Config {
            api_key,
            port,
            allowed_origins,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            relay_timeout: DEFAULT_RELAY_TIMEOUT,
        })
    }
}

/// Split a comma-separated origin list, dropping empty segments.
fn parse_origin_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let result = Config::from_lookup(lookup_from(&[]));
        assert!(matches!(result, Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn test_blank_api_key_is_fatal() {
        let result = Config::from_lookup(lookup_from(&[("RAPIDAPI_KEY", "   ")]));
        assert!(matches!(result, Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[("RAPIDAPI_KEY", "k")])).unwrap();
        assert_eq!(config.api_key, "k");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.allowed_origins, vec!["http://localhost:7700"]);
    }

    #[test]
    fn test_port_override() {
        let config =
            Config::from_lookup(lookup_from(&[("RAPIDAPI_KEY", "k"), ("PORT", "8080")])).unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_invalid_port() {
        let result =
            Config::from_lookup(lookup_from(&[("RAPIDAPI_KEY", "k"), ("PORT", "not-a-port")]));
        assert!(matches!(result, Err(ConfigError::InvalidPort(_))));
    }

    #[test]
    fn test_origin_list_parsing() {
        let config = Config::from_lookup(lookup_from(&[
            ("RAPIDAPI_KEY", "k"),
            (
                "ALLOWED_ORIGINS",
                "https://example.com, http://localhost:7700,,",
            ),
        ]))
        .unwrap();
        assert_eq!(
            config.allowed_origins,
            vec!["https://example.com", "http://localhost:7700"]
        );
    }
}
