//! Entity Caches - read-through hash caches for users, videos and comments
//!
//! One hash per `(kind, id)`. A read checks key existence, reconstructs the
//! record field by field on a hit and refreshes the TTL; a miss loads the row
//! from the store of record and writes it back with a TTL.
//!
//! A hit whose fields are missing or unparsable (a half-written entry, or a
//! key that expired between the existence check and the field reads) is
//! logged, dropped and repopulated like a miss.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::hash::{self, HashRecord};
use crate::keys::KeySpace;
use crate::model::{Comment, User, Video};
use crate::traits::{CacheStore, RecordStore};

/// A record that can be loaded from the store of record by id
#[async_trait]
pub trait CachedEntity: HashRecord + Send + Sync + 'static {
    /// Fetch the row for `id`; `Ok(None)` when it does not exist
    async fn load(store: &dyn RecordStore, id: i64) -> anyhow::Result<Option<Self>>;
}

#[async_trait]
impl CachedEntity for User {
    async fn load(store: &dyn RecordStore, id: i64) -> anyhow::Result<Option<Self>> {
        store.get_user(id).await
    }
}

#[async_trait]
impl CachedEntity for Video {
    async fn load(store: &dyn RecordStore, id: i64) -> anyhow::Result<Option<Self>> {
        store.get_video(id).await
    }
}

#[async_trait]
impl CachedEntity for Comment {
    async fn load(store: &dyn RecordStore, id: i64) -> anyhow::Result<Option<Self>> {
        store.get_comment(id).await
    }
}

/// Hit/miss counters of one entity cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Hits that had to be discarded and repopulated
    pub repairs: u64,
}

/// Read-through cache of one entity kind
pub struct EntityCache<T> {
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn RecordStore>,
    keys: KeySpace,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    repairs: AtomicU64,
    _record: PhantomData<fn() -> T>,
}

pub type UserCache = EntityCache<User>;
pub type VideoCache = EntityCache<Video>;
pub type CommentCache = EntityCache<Comment>;

impl<T: CachedEntity> EntityCache<T> {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        store: Arc<dyn RecordStore>,
        keys: KeySpace,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            keys,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            repairs: AtomicU64::new(0),
            _record: PhantomData,
        }
    }

    /// Cache key of entity `id`
    #[must_use]
    pub fn key(&self, id: i64) -> String {
        self.keys.entity(T::KIND, id)
    }

    /// Read entity `id`, populating the cache on a miss.
    ///
    /// The returned record never carries skipped fields, whether it came from
    /// the cache or from the store of record.
    ///
    /// # Errors
    ///
    /// - [`CacheError::NotFound`] if the store of record has no such row
    /// - [`CacheError::Store`] if the store-of-record read fails
    /// - [`CacheError::CacheUnavailable`] if a cache command fails outside the
    ///   hit path, including while writing the populated entry
    pub async fn read(&self, id: i64) -> CacheResult<T> {
        let key = self.key(id);

        let present = self
            .cache
            .exists(&key)
            .await
            .map_err(CacheError::unavailable)?;

        if present {
            match hash::read_hash::<T>(self.cache.as_ref(), &key).await {
                Ok(record) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    self.cache
                        .set_expire(&key, self.ttl)
                        .await
                        .map_err(CacheError::unavailable)?;
                    return Ok(record);
                }
                Err(e) if e.is_treated_as_miss() => {
                    self.repairs.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "Discarding unreadable cache entry");
                    if matches!(e, CacheError::MalformedCacheEntry { .. }) {
                        hash::discard_partial(self.cache.as_ref(), &key).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.populate(id, &key).await
    }

    async fn populate(&self, id: i64, key: &str) -> CacheResult<T> {
        let record = T::load(self.store.as_ref(), id)
            .await
            .map_err(CacheError::Store)?
            .ok_or(CacheError::NotFound { kind: T::KIND, id })?;

        self.store_entry(key, &record).await?;
        debug!(key = %key, "Populated entity cache from store of record");
        Ok(record.projected())
    }

    /// Write `record` straight into the cache with a fresh TTL.
    ///
    /// Only for records whose current cache entry cannot hold a different
    /// value, such as freshly created rows.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheUnavailable`] if a cache command fails; the
    /// partial entry is deleted first.
    pub async fn write_through(&self, record: &T) -> CacheResult<()> {
        let key = self.key(record.id());
        self.store_entry(&key, record).await?;
        debug!(key = %key, "Wrote entity through to cache");
        Ok(())
    }

    async fn store_entry(&self, key: &str, record: &T) -> CacheResult<()> {
        hash::write_hash(self.cache.as_ref(), key, record).await?;
        if let Err(e) = self.cache.set_expire(key, self.ttl).await {
            // A hash without a TTL would never heal
            hash::discard_partial(self.cache.as_ref(), key).await;
            return Err(CacheError::unavailable(e));
        }
        Ok(())
    }

    /// Delete the entry for `id`; deleting an absent entry succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheUnavailable`] if the delete fails.
    pub async fn invalidate(&self, id: i64) -> CacheResult<()> {
        let key = self.key(id);
        self.cache
            .delete(&key)
            .await
            .map_err(CacheError::unavailable)
    }

    pub fn stats(&self) -> EntityCacheStats {
        EntityCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            repairs: self.repairs.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DashMapCache;
    use crate::keys::EntityKind;
    use crate::model::NewVideo;
    use crate::store::MemoryStore;

    const TTL: Duration = Duration::from_secs(60);

    fn setup() -> (Arc<DashMapCache>, Arc<MemoryStore>) {
        (Arc::new(DashMapCache::new()), Arc::new(MemoryStore::new()))
    }

    fn user_cache(cache: &Arc<DashMapCache>, store: &Arc<MemoryStore>) -> UserCache {
        EntityCache::new(cache.clone(), store.clone(), KeySpace::default(), TTL)
    }

    #[tokio::test]
    async fn test_cold_then_warm_read() {
        let (cache, store) = setup();
        let alice = store.create_user("alice", "hash").await.unwrap();
        let users = user_cache(&cache, &store);

        let cold = users.read(alice.id).await.unwrap();
        assert_eq!(cold.name, "alice");
        assert!(cold.password.is_empty());
        let reads = store.read_count();

        let warm = users.read(alice.id).await.unwrap();
        assert_eq!(warm, cold);
        assert_eq!(store.read_count(), reads);
        assert_eq!(
            users.stats(),
            EntityCacheStats {
                hits: 1,
                misses: 1,
                repairs: 0
            }
        );
    }

    #[tokio::test]
    async fn test_missing_row_is_not_found() {
        let (cache, store) = setup();
        let users = user_cache(&cache, &store);
        let err = users.read(404).await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::NotFound {
                kind: EntityKind::User,
                id: 404
            }
        ));
        assert!(!cache.exists("user:404").await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_entry_is_repopulated() {
        let (cache, store) = setup();
        let bob = store.create_user("bob", "hash").await.unwrap();
        let users = user_cache(&cache, &store);
        let key = users.key(bob.id);
        cache.set_hash_field(&key, "id", "not-a-number").await.unwrap();

        let read = users.read(bob.id).await.unwrap();
        assert_eq!(read.name, "bob");
        assert_eq!(users.stats().repairs, 1);
        assert_eq!(
            cache.get_hash_field(&key, "id").await.unwrap(),
            Some(bob.id.to_string())
        );
    }

    #[tokio::test]
    async fn test_write_through_skips_store() {
        let (cache, store) = setup();
        let author = store.create_user("author", "hash").await.unwrap();
        let video = store
            .create_video(NewVideo {
                user_id: author.id,
                play_url: "p".into(),
                cover_url: "c".into(),
                title: "t".into(),
                create_time: 1000,
            })
            .await
            .unwrap();
        let videos: VideoCache =
            EntityCache::new(cache.clone(), store.clone(), KeySpace::default(), TTL);

        videos.write_through(&video).await.unwrap();
        let reads = store.read_count();
        assert_eq!(videos.read(video.id).await.unwrap(), video);
        assert_eq!(store.read_count(), reads);
        assert!(cache.ttl(&videos.key(video.id)).is_some());
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let (cache, store) = setup();
        let carol = store.create_user("carol", "hash").await.unwrap();
        let users = user_cache(&cache, &store);
        users.read(carol.id).await.unwrap();

        users.invalidate(carol.id).await.unwrap();
        users.invalidate(carol.id).await.unwrap();
        assert!(!cache.exists(&users.key(carol.id)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_refreshes_ttl() {
        let (cache, store) = setup();
        let dave = store.create_user("dave", "hash").await.unwrap();
        let users = user_cache(&cache, &store);
        users.read(dave.id).await.unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        users.read(dave.id).await.unwrap();
        assert_eq!(cache.ttl(&users.key(dave.id)), Some(TTL));
    }
}
