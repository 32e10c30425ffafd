//! Uploader configuration.
//!
//! Values come from the environment (optionally seeded from a `.env` file)
//! and may be overridden from the command line. The resulting
//! [`UploaderConfig`] is passed explicitly to the client and orchestrator.

use std::env;
use std::time::Duration;

use serde::Serialize;

use crate::error::{ConfigError, ConfigResult};
use crate::upload::RetryPolicy;

/// Remote API base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Per-request timeout for one chunk.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Pause between two chunk requests.
pub const DEFAULT_CHUNK_PAUSE_MS: u64 = 500;

/// Retries per chunk after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Delay before the first retry; doubles on each further retry.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;

pub const ENV_API_URL: &str = "LISTLOAD_API_URL";
pub const ENV_API_TOKEN: &str = "LISTLOAD_API_TOKEN";
pub const ENV_TIMEOUT_SECS: &str = "LISTLOAD_TIMEOUT_SECS";
pub const ENV_CHUNK_PAUSE_MS: &str = "LISTLOAD_CHUNK_PAUSE_MS";
pub const ENV_MAX_RETRIES: &str = "LISTLOAD_MAX_RETRIES";
pub const ENV_RETRY_BACKOFF_MS: &str = "LISTLOAD_RETRY_BACKOFF_MS";

/// Everything needed to talk to the ingestion endpoint and pace a job.
#[derive(Debug, Clone, Serialize)]
pub struct UploaderConfig {
    /// Base URL of the remote API (without `/contacts/upload`)
    pub api_url: String,
    /// Bearer token sent with every request
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    /// Bound on a single chunk request
    pub request_timeout: Duration,
    /// Backpressure pause between chunks
    pub chunk_pause: Duration,
    /// Retry policy for failed chunks
    pub retry: RetryPolicy,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            chunk_pause: Duration::from_millis(DEFAULT_CHUNK_PAUSE_MS),
            retry: RetryPolicy {
                max_retries: DEFAULT_MAX_RETRIES,
                initial_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            },
        }
    }
}

impl UploaderConfig {
    /// Load configuration from the environment, reading `.env` if present.
    pub fn from_env() -> ConfigResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_API_URL) {
            config.api_url = url;
        }
        config.api_token = lookup(ENV_API_TOKEN).filter(|t| !t.trim().is_empty());

        if let Some(secs) = parse_var::<u64>(&lookup, ENV_TIMEOUT_SECS)? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_CHUNK_PAUSE_MS)? {
            config.chunk_pause = Duration::from_millis(ms);
        }
        if let Some(retries) = parse_var::<u32>(&lookup, ENV_MAX_RETRIES)? {
            config.retry.max_retries = retries;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_RETRY_BACKOFF_MS)? {
            config.retry.initial_backoff = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that the rest of the pipeline relies on.
    pub fn validate(&self) -> ConfigResult<()> {
        let url = self.api_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(self.api_url.clone()));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: ENV_TIMEOUT_SECS.to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Full URL of the ingestion endpoint.
    pub fn upload_url(&self) -> String {
        format!("{}/contacts/upload", self.api_url.trim().trim_end_matches('/'))
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> ConfigResult<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = UploaderConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.chunk_pause, Duration::from_millis(500));
        assert_eq!(config.retry.max_retries, 2);
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = UploaderConfig::from_lookup(lookup_from(&[
            (ENV_API_URL, "https://api.example.com/"),
            (ENV_API_TOKEN, "secret"),
            (ENV_TIMEOUT_SECS, "30"),
            (ENV_CHUNK_PAUSE_MS, "250"),
            (ENV_MAX_RETRIES, "0"),
        ]))
        .unwrap();

        assert_eq!(config.upload_url(), "https://api.example.com/contacts/upload");
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.chunk_pause, Duration::from_millis(250));
        assert_eq!(config.retry.max_retries, 0);
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = UploaderConfig::from_lookup(lookup_from(&[(ENV_TIMEOUT_SECS, "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_TIMEOUT_SECS));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = UploaderConfig::from_lookup(lookup_from(&[(ENV_API_URL, "ftp://x")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl(_)));
    }
}
