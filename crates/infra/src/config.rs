//! Runtime configuration read from environment variables.
//!
//! A `.env` file in the working directory is loaded once, on first use.

use std::env;
use std::time::Duration;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv();
});

pub const DEFAULT_WAKE_CHANNEL: &str = "codeflow_jobs";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Postgres connection string; `None` runs everything in memory.
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Worker polling interval.
    pub tick_interval: Duration,
    pub wake_channel: String,
    /// Longest a single wait on the wake subscription may block.
    pub wake_timeout: Duration,
    /// Pause before resubscribing after a wake channel failure.
    pub wake_backoff: Duration,
    pub redis_url: Option<String>,
    /// Base URL quoted in publish notes.
    pub base_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 16,
            tick_interval: Duration::from_millis(2000),
            wake_channel: DEFAULT_WAKE_CHANNEL.to_string(),
            wake_timeout: Duration::from_millis(5000),
            wake_backoff: Duration::from_millis(2000),
            redis_url: None,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparseable values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let millis = |key: &str, fallback: Duration| {
            text(key)
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };

        Self {
            database_url: text("DATABASE_URL"),
            max_connections: text("DATABASE_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            tick_interval: millis("CODEFLOW_TICK_MS", defaults.tick_interval),
            wake_channel: text("CODEFLOW_WAKE_CHANNEL").unwrap_or(defaults.wake_channel),
            wake_timeout: millis("CODEFLOW_WAKE_TIMEOUT_MS", defaults.wake_timeout),
            wake_backoff: millis("CODEFLOW_WAKE_BACKOFF_MS", defaults.wake_backoff),
            redis_url: text("REDIS_URL"),
            base_url: text("APP_BASE_URL").unwrap_or(defaults.base_url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        assert_eq!(config(&[]), AppConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://localhost/codeflow"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("CODEFLOW_TICK_MS", "250"),
            ("CODEFLOW_WAKE_CHANNEL", "jobs_dev"),
            ("APP_BASE_URL", "https://codeflow.test"),
        ]);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/codeflow"));
        assert_eq!(cfg.max_connections, 4);
        assert_eq!(cfg.tick_interval, Duration::from_millis(250));
        assert_eq!(cfg.wake_channel, "jobs_dev");
        assert_eq!(cfg.base_url, "https://codeflow.test");
        assert_eq!(cfg.wake_timeout, Duration::from_secs(5));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let cfg = config(&[
            ("CODEFLOW_TICK_MS", "soon"),
            ("CODEFLOW_WAKE_BACKOFF_MS", "0"),
            ("DATABASE_URL", "   "),
        ]);
        assert_eq!(cfg.tick_interval, Duration::from_secs(2));
        assert_eq!(cfg.wake_backoff, Duration::from_secs(2));
        assert!(cfg.database_url.is_none());
    }
}
