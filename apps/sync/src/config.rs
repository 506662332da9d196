use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Layer configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub data_dir: PathBuf,
    /// When set, persisted state goes to Redis instead of `data_dir`.
    pub redis_url: Option<String>,
    pub stale_time: Duration,
    pub probe_interval: Duration,
    pub stream_word_delay: Duration,
    pub request_timeout: Duration,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            api_base_url: require_env("API_BASE_URL")?,
            api_token: optional_env("API_TOKEN"),
            data_dir: PathBuf::from(
                optional_env("DATA_DIR").unwrap_or_else(|| "./data".to_string()),
            ),
            redis_url: optional_env("REDIS_URL"),
            stale_time: Duration::from_secs(parse_env("STALE_TIME_SECS", 300)?),
            probe_interval: Duration::from_secs(parse_env("PROBE_INTERVAL_SECS", 15)?),
            stream_word_delay: Duration::from_millis(parse_env("STREAM_WORD_DELAY_MS", 30)?),
            request_timeout: Duration::from_secs(parse_env("REQUEST_TIMEOUT_SECS", 30)?),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Configuration pointing at a local backend, used by tests and demos.
    pub fn local(api_base_url: impl Into<String>) -> Self {
        Config {
            api_base_url: api_base_url.into(),
            api_token: None,
            data_dir: PathBuf::from("./data"),
            redis_url: None,
            stale_time: Duration::from_secs(300),
            probe_interval: Duration::from_secs(15),
            stream_word_delay: Duration::from_millis(30),
            request_timeout: Duration::from_secs(30),
            rust_log: "info".to_string(),
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env(key: &str, default: u64) -> Result<u64> {
    match optional_env(key) {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{key} must be a non-negative integer")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_defaults() {
        let config = Config::local("http://127.0.0.1:9000");
        assert_eq!(config.api_base_url, "http://127.0.0.1:9000");
        assert_eq!(config.stale_time, Duration::from_secs(300));
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_parse_env_falls_back_to_default() {
        let value = parse_env("RECRUIT_SYNC_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
