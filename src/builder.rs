//! Video Cache System Builder
//!
//! Assembles a [`VideoCacheSystem`] from a store of record plus an optional
//! custom cache store and configuration.
//!
//! # Example: Default Redis Backend
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use video_cache::{MemoryStore, VideoCacheSystemBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let system = VideoCacheSystemBuilder::new()
//!         .with_store(Arc::new(MemoryStore::new()))
//!         .build()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Custom Cache Store
//!
//! ```rust,ignore
//! use video_cache::{VideoCacheSystemBuilder, CacheStore};
//! use std::sync::Arc;
//!
//! let system = VideoCacheSystemBuilder::new()
//!     .with_cache(Arc::new(MyCacheStore::new()))
//!     .with_store(Arc::new(MyDatabase::connect().await?))
//!     .build()
//!     .await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::backends::RedisCache;
use crate::config::CacheConfig;
use crate::traits::{CacheStore, RecordStore};
use crate::VideoCacheSystem;

/// Builder for constructing [`VideoCacheSystem`]
///
/// # Default Behavior
///
/// - **Cache store**: Redis at `config.redis_url`
/// - **Config**: [`CacheConfig::default`]
///
/// The store of record has no default and must be supplied.
#[derive(Default)]
pub struct VideoCacheSystemBuilder {
    cache: Option<Arc<dyn CacheStore>>,
    store: Option<Arc<dyn RecordStore>>,
    config: Option<CacheConfig>,
}

impl VideoCacheSystemBuilder {
    /// Create a new builder with nothing configured
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom cache store instead of connecting to Redis
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The store of record (required)
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Shorthand for overriding only the TTL
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        let config = self.config.take().unwrap_or_default();
        self.config = Some(config.with_ttl(ttl));
        self
    }

    /// Build the system, connecting to Redis unless a cache store was given
    ///
    /// # Errors
    ///
    /// Returns an error if no store of record was supplied, the configuration
    /// is invalid, or the Redis connection fails.
    pub async fn build(self) -> Result<VideoCacheSystem> {
        info!("Building Video Cache System...");

        let store = self
            .store
            .context("a store of record is required (call with_store)")?;
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let cache: Arc<dyn CacheStore> = match self.cache {
            Some(cache) => {
                info!(backend = cache.name(), "Using custom cache store");
                cache
            }
            None => {
                info!(redis_url = %config.redis_url, "Using default cache store (Redis)");
                Arc::new(RedisCache::with_url(&config.redis_url).await?)
            }
        };

        let system = VideoCacheSystem::with_backends(cache, store, config)?;
        info!("Video Cache System built successfully");
        Ok(system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DashMapCache;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_build_with_custom_cache() {
        let system = VideoCacheSystemBuilder::new()
            .with_cache(Arc::new(DashMapCache::new()))
            .with_store(Arc::new(MemoryStore::new()))
            .with_ttl(Duration::from_secs(30))
            .build()
            .await
            .unwrap();
        assert_eq!(system.config.ttl_duration(), Duration::from_secs(30));
        assert!(system.health_check().await);
    }

    #[tokio::test]
    async fn test_store_is_required() {
        let err = VideoCacheSystemBuilder::new()
            .with_cache(Arc::new(DashMapCache::new()))
            .build()
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("store of record"));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = VideoCacheSystemBuilder::new()
            .with_cache(Arc::new(DashMapCache::new()))
            .with_store(Arc::new(MemoryStore::new()))
            .with_ttl(Duration::ZERO)
            .build()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_reports_final_stats() {
        let system = VideoCacheSystemBuilder::new()
            .with_cache(Arc::new(DashMapCache::new()))
            .with_store(Arc::new(MemoryStore::new()))
            .build()
            .await
            .unwrap();
        let service = system.service();
        let user = service.register("alice", "hash").await.unwrap();
        service.user_info(0, user.id).await.unwrap();

        let stats = system.shutdown();
        assert_eq!(stats.users.hits, 1);
        assert_eq!(stats.invalidation.started, 0);
        // Services hold their own handles
        assert_eq!(service.user_info(0, user.id).await.unwrap().user.id, user.id);
    }
}
