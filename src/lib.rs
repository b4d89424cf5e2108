//! Video Cache
//!
//! The cache-consistency layer of a social-video backend (feed, publish,
//! comment, favorite, follow), sitting in front of a relational store of
//! record:
//! - **Entity Caches**: read-through hashes for users, videos and comments
//! - **Collection Caches**: owner-keyed id sets for follows, followers, likes,
//!   comments and published videos
//! - **Feed Timeline**: one global sorted set scored by creation time
//! - **Delayed Double-Delete**: every mutation deletes stale entries before
//!   and after its store-of-record transaction
//! - **Composite Assembler**: videos hydrated with author, like and follow
//!   state for a viewer
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use video_cache::{Action, MemoryStore, VideoCacheSystem};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Redis from REDIS_URL, any RecordStore as the store of record
//!     let system = VideoCacheSystem::new(Arc::new(MemoryStore::new())).await?;
//!     system.bootstrap_feed().await?;
//!
//!     let service = system.service();
//!     let alice = service.register("alice", "hash").await?;
//!     let video = service.publish(alice.id, "https://cdn/v.mp4", "https://cdn/v.jpg", "hi").await?;
//!     service.favorite_action(alice.id, video.id, Action::Do).await?;
//!
//!     let page = service.feed(alice.id, None).await?;
//!     tracing::info!(count = page.videos.len(), "feed");
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! read:  Service → Assembler → Entity / Collection cache → hit: refresh TTL
//!                                                       → miss: store of record → write back + TTL
//! write: Service → InvalidationCoordinator → delete → transaction → delete → collection writeback
//! ```

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

pub mod assembler;
pub mod backends;
pub mod builder;
pub mod collection;
pub mod config;
pub mod entity;
pub mod error;
pub mod hash;
pub mod invalidation;
pub mod keys;
pub mod model;
pub mod service;
pub mod store;
pub mod timeline;
pub mod traits;

pub use assembler::Assembler;
pub use backends::{DashMapCache, RedisCache};
pub use builder::VideoCacheSystemBuilder;
pub use collection::{CollectionCache, Collections, Membership};
pub use config::{CacheConfig, CacheStrategy};
pub use entity::{CommentCache, EntityCache, EntityCacheStats, UserCache, VideoCache};
pub use error::{CacheError, CacheResult, StoreError};
pub use invalidation::{InvalidationCoordinator, InvalidationStats, Mutation, Step};
pub use keys::{CollectionKind, EntityKind, KeySpace};
pub use model::{ANONYMOUS, Comment, CommentView, User, UserView, Video, VideoView};
pub use service::{Action, CommentAction, FeedPage, ServiceError, SocialService};
pub use store::MemoryStore;
pub use timeline::{BootstrapReport, FeedTimeline};
pub use traits::{CacheStore, RecordStore};

// Re-export async_trait for implementors of the backend traits
pub use async_trait::async_trait;

/// Statistics across the cache layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemStats {
    pub users: EntityCacheStats,
    pub videos: EntityCacheStats,
    pub comments: EntityCacheStats,
    pub invalidation: InvalidationStats,
}

/// Main entry point: every component wired to one cache store and one store
/// of record
///
/// The handles are constructed once at startup and shared; cloning the system
/// clones `Arc`s.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use video_cache::{CacheConfig, DashMapCache, MemoryStore, VideoCacheSystem};
///
/// let system = VideoCacheSystem::with_backends(
///     Arc::new(DashMapCache::new()),
///     Arc::new(MemoryStore::new()),
///     CacheConfig::default(),
/// )?;
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Clone)]
pub struct VideoCacheSystem {
    pub config: CacheConfig,
    pub cache: Arc<dyn CacheStore>,
    pub store: Arc<dyn RecordStore>,
    pub keys: KeySpace,
    pub users: Arc<UserCache>,
    pub videos: Arc<VideoCache>,
    pub comments: Arc<CommentCache>,
    pub collections: Arc<Collections>,
    pub timeline: Arc<FeedTimeline>,
    pub invalidation: Arc<InvalidationCoordinator>,
    pub assembler: Arc<Assembler>,
}

impl VideoCacheSystem {
    /// Create a system backed by Redis, configured from the environment
    ///
    /// See [`CacheConfig::from_env`] for the variables read.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or Redis is unreachable.
    pub async fn new(store: Arc<dyn RecordStore>) -> Result<Self> {
        VideoCacheSystemBuilder::new()
            .with_config(CacheConfig::from_env()?)
            .with_store(store)
            .build()
            .await
    }

    /// Wire every component to the given backends
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn with_backends(
        cache: Arc<dyn CacheStore>,
        store: Arc<dyn RecordStore>,
        config: CacheConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            cache = cache.name(),
            ttl_secs = config.ttl_duration().as_secs(),
            max_feed_size = config.max_feed_size,
            "Initializing Video Cache System"
        );

        let keys = KeySpace::new(config.key_prefix.clone());
        let ttl = config.ttl_duration();

        let users = Arc::new(EntityCache::new(cache.clone(), store.clone(), keys.clone(), ttl));
        let videos = Arc::new(EntityCache::new(cache.clone(), store.clone(), keys.clone(), ttl));
        let comments = Arc::new(EntityCache::new(cache.clone(), store.clone(), keys.clone(), ttl));
        let collections = Arc::new(Collections::new(&cache, &store, &keys, ttl));
        let timeline = Arc::new(FeedTimeline::new(
            cache.clone(),
            store.clone(),
            &keys,
            ttl,
            config.max_feed_size,
            config.max_feed_bootstrap,
            videos.clone(),
            users.clone(),
            collections.clone(),
        ));
        let invalidation = Arc::new(InvalidationCoordinator::new(
            cache.clone(),
            store.clone(),
            keys.clone(),
            videos.clone(),
            comments.clone(),
            collections.clone(),
            timeline.clone(),
        ));
        let assembler = Arc::new(Assembler::new(
            users.clone(),
            videos.clone(),
            comments.clone(),
            collections.clone(),
        ));

        Ok(Self {
            config,
            cache,
            store,
            keys,
            users,
            videos,
            comments,
            collections,
            timeline,
            invalidation,
            assembler,
        })
    }

    /// Check that the cache store answers
    pub async fn health_check(&self) -> bool {
        let ok = self.cache.health_check().await;
        if ok {
            info!(cache = self.cache.name(), "Video Cache health check passed");
        } else {
            warn!(cache = self.cache.name(), "Video Cache health check failed");
        }
        ok
    }

    /// Endpoint handlers sharing this system's components
    #[must_use]
    pub fn service(&self) -> SocialService {
        SocialService::new(self.clone())
    }

    /// Populate the feed timeline unless a bootstrap already completed; run
    /// once at startup
    ///
    /// # Errors
    ///
    /// See [`FeedTimeline::bootstrap`].
    pub async fn bootstrap_feed(&self) -> CacheResult<BootstrapReport> {
        self.timeline.bootstrap(model::unix_now()).await
    }

    pub fn stats(&self) -> SystemStats {
        SystemStats {
            users: self.users.stats(),
            videos: self.videos.stats(),
            comments: self.comments.stats(),
            invalidation: self.invalidation.stats(),
        }
    }

    /// Release this handle's backend connections and return the final
    /// statistics
    ///
    /// Other clones (including services) keep their own handles alive.
    pub fn shutdown(self) -> SystemStats {
        let stats = self.stats();
        info!(?stats, "Shutting down Video Cache System");
        stats
    }
}
