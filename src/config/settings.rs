//! Application settings and marketplace credentials.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::RetryPolicy;
use crate::scheduler::RaiseSettings;

/// Marketplace API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    /// Base URL of the marketplace API.
    pub base_url: String,

    /// Account token sent with every request.
    pub token: String,

    /// User agent presented to the marketplace.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    format!("marketplace_autobot/{}", env!("CARGO_PKG_VERSION"))
}

impl MarketplaceConfig {
    /// Creates a new marketplace configuration.
    #[must_use]
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            base_url,
            token,
            user_agent: default_user_agent(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `MARKETPLACE_BASE_URL` and `MARKETPLACE_TOKEN` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("MARKETPLACE_BASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("MARKETPLACE_BASE_URL"))?;

        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(base_url));
        }

        let token = std::env::var("MARKETPLACE_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("MARKETPLACE_TOKEN"))?;

        let user_agent =
            std::env::var("MARKETPLACE_USER_AGENT").unwrap_or_else(|_| default_user_agent());

        Ok(Self {
            base_url,
            token,
            user_agent,
        })
    }
}

/// Bot-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Seconds to wait between polls that returned nothing new.
    pub poll_interval_secs: u64,

    /// Seconds to back off after a failed poll.
    pub poll_error_delay_secs: u64,

    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,

    /// Whether the autoraise scheduler runs.
    pub autoraise: bool,

    /// Safety ceiling between raise passes, in seconds.
    pub raise_interval_secs: u64,

    /// Delay between successive category raises, in milliseconds.
    pub raise_pacing_ms: u64,

    /// Backoff after the marketplace throttles a raise pass, in seconds.
    pub raise_throttle_backoff_secs: u64,

    /// Re-raise right after a success to learn the next cooldown.
    pub probe_after_raise: bool,

    /// Total attempts per outbound request.
    pub retry_max_attempts: u32,

    /// First retry delay in seconds (doubled per retry).
    pub retry_base_delay_secs: u64,

    /// Cap on the exponential retry delay in seconds.
    pub retry_max_delay_secs: u64,

    /// Maximum random jitter per retry, in milliseconds.
    pub retry_jitter_ms: u64,

    /// Where the raise scheduler persists its cooldowns.
    pub raise_state_path: PathBuf,

    /// Where order/message statistics are flushed.
    pub stats_path: PathBuf,

    /// Seconds between statistics flushes.
    pub stats_flush_secs: u64,

    /// Command prefix for admin console commands.
    pub command_prefix: String,

    /// Log level for the application.
    pub log_level: String,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 6,
            poll_error_delay_secs: 10,
            request_timeout_secs: 30,
            autoraise: true,
            raise_interval_secs: 3600,
            raise_pacing_ms: 1000,
            raise_throttle_backoff_secs: 300,
            probe_after_raise: true,
            retry_max_attempts: 6,
            retry_base_delay_secs: 5,
            retry_max_delay_secs: 60,
            retry_jitter_ms: 1000,
            raise_state_path: PathBuf::from("raise_state.json"),
            stats_path: PathBuf::from("stats.json"),
            stats_flush_secs: 60,
            command_prefix: "/autobot".to_owned(),
            log_level: "info".to_owned(),
        }
    }
}

/// Reads `name` from the environment, falling back to `default` when it is
/// unset or does not parse.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl BotSettings {
    /// Creates bot settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        let d = Self::default();
        Self {
            poll_interval_secs: env_or("POLL_INTERVAL", d.poll_interval_secs),
            poll_error_delay_secs: env_or("POLL_ERROR_DELAY", d.poll_error_delay_secs),
            request_timeout_secs: env_or("REQUEST_TIMEOUT", d.request_timeout_secs),
            autoraise: env_or("AUTORAISE", d.autoraise),
            raise_interval_secs: env_or("RAISE_INTERVAL", d.raise_interval_secs),
            raise_pacing_ms: env_or("RAISE_PACING_MS", d.raise_pacing_ms),
            raise_throttle_backoff_secs: env_or("RAISE_THROTTLE_BACKOFF", d.raise_throttle_backoff_secs),
            probe_after_raise: env_or("RAISE_PROBE", d.probe_after_raise),
            retry_max_attempts: env_or("RETRY_MAX_ATTEMPTS", d.retry_max_attempts),
            retry_base_delay_secs: env_or("RETRY_BASE_DELAY", d.retry_base_delay_secs),
            retry_max_delay_secs: env_or("RETRY_MAX_DELAY", d.retry_max_delay_secs),
            retry_jitter_ms: env_or("RETRY_JITTER_MS", d.retry_jitter_ms),
            raise_state_path: std::env::var("RAISE_STATE_PATH").map_or(d.raise_state_path, PathBuf::from),
            stats_path: std::env::var("STATS_PATH").map_or(d.stats_path, PathBuf::from),
            stats_flush_secs: env_or("STATS_FLUSH_INTERVAL", d.stats_flush_secs),
            command_prefix: std::env::var("COMMAND_PREFIX").unwrap_or(d.command_prefix),
            log_level: std::env::var("RUST_LOG").unwrap_or(d.log_level),
        }
    }

    /// Retry policy for the resilient HTTP client.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: Duration::from_secs(self.retry_base_delay_secs),
            max_delay: Duration::from_secs(self.retry_max_delay_secs),
            max_jitter: Duration::from_millis(self.retry_jitter_ms),
            ..RetryPolicy::default()
        }
    }

    /// Settings for the raise scheduler.
    #[must_use]
    pub fn raise_settings(&self) -> RaiseSettings {
        RaiseSettings {
            default_interval: Duration::from_secs(self.raise_interval_secs),
            throttle_backoff: Duration::from_secs(self.raise_throttle_backoff_secs),
            pacing: Duration::from_millis(self.raise_pacing_ms),
            probe_after_raise: self.probe_after_raise,
            state_path: Some(self.raise_state_path.clone()),
            ..RaiseSettings::default()
        }
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub const fn poll_error_delay(&self) -> Duration {
        Duration::from_secs(self.poll_error_delay_secs)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub const fn stats_flush_interval(&self) -> Duration {
        Duration::from_secs(self.stats_flush_secs)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid marketplace base URL (must start with http:// or https://): {0}")]
    InvalidBaseUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = BotSettings::default();
        assert_eq!(settings.command_prefix, "/autobot");
        assert_eq!(settings.poll_interval(), Duration::from_secs(6));
        assert!(settings.autoraise);
    }

    #[test]
    fn test_retry_policy_from_settings() {
        let settings = BotSettings {
            retry_max_attempts: 0,
            retry_base_delay_secs: 2,
            ..BotSettings::default()
        };
        let policy = settings.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.max_jitter, Duration::from_secs(1));
    }

    #[test]
    fn test_raise_settings_from_settings() {
        let settings = BotSettings::default();
        let raise = settings.raise_settings();
        assert_eq!(raise.throttle_backoff, Duration::from_secs(300));
        assert_eq!(raise.pacing, Duration::from_secs(1));
        assert_eq!(raise.state_path, Some(PathBuf::from("raise_state.json")));
    }

    #[test]
    fn test_marketplace_config_new() {
        let config = MarketplaceConfig::new("https://market.test".to_owned(), "abc123".to_owned());
        assert_eq!(config.token, "abc123");
        assert!(config.user_agent.starts_with("marketplace_autobot/"));
    }
}
