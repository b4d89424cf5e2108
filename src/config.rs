//! Cache layer configuration
//!
//! TTL policy, feed page limits and the Redis connection string. Values come
//! from [`CacheConfig::default`] or from environment variables via
//! [`CacheConfig::from_env`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Default TTL for every cache entry (24 hours)
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum number of videos returned by one live feed request
pub const DEFAULT_MAX_FEED_SIZE: usize = 30;

/// Maximum number of videos loaded into the timeline at bootstrap
pub const DEFAULT_MAX_FEED_BOOTSTRAP: usize = 10_000;

/// Cache strategies for different data types
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum CacheStrategy {
    /// Real-time data - 10 seconds TTL
    RealTime,
    /// Short-term data - 5 minutes TTL
    ShortTerm,
    /// Medium-term data - 1 hour TTL
    MediumTerm,
    /// Long-term data - 3 hours TTL
    LongTerm,
    /// Custom TTL
    Custom(Duration),
    /// Default strategy (24 hours)
    Default,
}

impl CacheStrategy {
    /// Convert strategy to duration
    #[must_use]
    pub fn to_duration(&self) -> Duration {
        match self {
            Self::RealTime => Duration::from_secs(10),
            Self::ShortTerm => Duration::from_secs(300),
            Self::MediumTerm => Duration::from_secs(3600),
            Self::LongTerm => Duration::from_secs(10800),
            Self::Custom(duration) => *duration,
            Self::Default => DEFAULT_TTL,
        }
    }
}

/// Configuration surface of the cache layer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis connection string
    pub redis_url: String,
    /// TTL applied to every entity hash, owner set and the timeline
    pub ttl: CacheStrategy,
    /// Upper bound on ids returned by one feed read
    pub max_feed_size: usize,
    /// Upper bound on videos pulled into the timeline at bootstrap
    pub max_feed_bootstrap: usize,
    /// Optional namespace prepended to every key
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            ttl: CacheStrategy::Default,
            max_feed_size: DEFAULT_MAX_FEED_SIZE,
            max_feed_bootstrap: DEFAULT_MAX_FEED_BOOTSTRAP,
            key_prefix: String::new(),
        }
    }
}

impl CacheConfig {
    /// Build configuration from environment variables
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `REDIS_URL` | `redis://127.0.0.1:6379` |
    /// | `VIDEO_CACHE_TTL_SECS` | `86400` |
    /// | `VIDEO_CACHE_FEED_SIZE` | `30` |
    /// | `VIDEO_CACHE_BOOTSTRAP_SIZE` | `10000` |
    /// | `VIDEO_CACHE_KEY_PREFIX` | empty |
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let redis_url = std::env::var("REDIS_URL").unwrap_or(defaults.redis_url);
        let ttl = match std::env::var("VIDEO_CACHE_TTL_SECS") {
            Ok(raw) => CacheStrategy::Custom(Duration::from_secs(parse_var(
                "VIDEO_CACHE_TTL_SECS",
                &raw,
            )?)),
            Err(_) => defaults.ttl,
        };
        let max_feed_size = env_or("VIDEO_CACHE_FEED_SIZE", defaults.max_feed_size)?;
        let max_feed_bootstrap =
            env_or("VIDEO_CACHE_BOOTSTRAP_SIZE", defaults.max_feed_bootstrap)?;
        let key_prefix = std::env::var("VIDEO_CACHE_KEY_PREFIX").unwrap_or_default();

        let config = Self {
            redis_url,
            ttl,
            max_feed_size,
            max_feed_bootstrap,
            key_prefix,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the cache layer cannot honour
    ///
    /// # Errors
    ///
    /// Returns an error for a zero TTL, a zero feed page size or a zero
    /// bootstrap window.
    pub fn validate(&self) -> Result<()> {
        if self.ttl_duration().is_zero() {
            anyhow::bail!("cache TTL must be non-zero: every entry needs a finite expiry");
        }
        if self.max_feed_size == 0 {
            anyhow::bail!("max_feed_size must be at least 1");
        }
        if self.max_feed_bootstrap == 0 {
            anyhow::bail!("max_feed_bootstrap must be at least 1");
        }
        Ok(())
    }

    /// TTL as a `Duration`
    #[must_use]
    pub fn ttl_duration(&self) -> Duration {
        self.ttl.to_duration()
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = CacheStrategy::Custom(ttl);
        self
    }

    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_var(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Invalid value for {name}: '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_durations() {
        assert_eq!(CacheStrategy::RealTime.to_duration(), Duration::from_secs(10));
        assert_eq!(CacheStrategy::Default.to_duration(), DEFAULT_TTL);
        assert_eq!(
            CacheStrategy::Custom(Duration::from_millis(1500)).to_duration(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl_duration(), DEFAULT_TTL);
        assert_eq!(config.max_feed_size, 30);
        assert_eq!(config.max_feed_bootstrap, 10_000);
        assert!(config.key_prefix.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let config = CacheConfig::default().with_ttl(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_feed_windows_rejected() {
        let config = CacheConfig {
            max_feed_bootstrap: 0,
            ..CacheConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_feed_bootstrap"));

        let config = CacheConfig {
            max_feed_size: 0,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_var_errors_name_variable() {
        let err = parse_var::<usize>("VIDEO_CACHE_FEED_SIZE", "thirty").unwrap_err();
        assert!(err.to_string().contains("VIDEO_CACHE_FEED_SIZE"));
        assert_eq!(parse_var::<usize>("X", " 12 ").unwrap(), 12);
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"max_feed_size": 5, "key_prefix": "t1"}"#).unwrap();
        assert_eq!(config.max_feed_size, 5);
        assert_eq!(config.key_prefix, "t1");
        assert_eq!(config.ttl, CacheStrategy::Default);
    }
}
