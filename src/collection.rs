//! Collection Caches - owner-keyed id sets
//!
//! Follow, follower, favorite, comment-id and publish-id sets, each paired
//! with a backing query against the store of record.
//!
//! A cache set cannot exist while empty, so key presence alone cannot tell
//! "cached and empty" from "never cached". Every populated set therefore
//! carries a [`SENTINEL`] member, written after all real members. The
//! sentinel is the population flag: a set without it (absent, expired, or
//! half-written) is [`Membership::NotCached`] and gets repopulated.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::hash::discard_partial;
use crate::keys::{CollectionKind, KeySpace};
use crate::traits::{CacheStore, RecordStore};

/// Marker member present in every populated set
pub const SENTINEL: &str = "#";

/// Population state of one owner-keyed set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    NotCached,
    CachedEmpty,
    CachedWithMembers(Vec<i64>),
}

impl Membership {
    fn from_members(members: Vec<i64>) -> Self {
        if members.is_empty() {
            Self::CachedEmpty
        } else {
            Self::CachedWithMembers(members)
        }
    }

    #[must_use]
    pub fn is_cached(&self) -> bool {
        !matches!(self, Self::NotCached)
    }

    /// Member ids; empty unless cached with members
    #[must_use]
    pub fn members(&self) -> &[i64] {
        match self {
            Self::CachedWithMembers(members) => members,
            Self::NotCached | Self::CachedEmpty => &[],
        }
    }

    #[must_use]
    pub fn into_members(self) -> Vec<i64> {
        match self {
            Self::CachedWithMembers(members) => members,
            Self::NotCached | Self::CachedEmpty => Vec::new(),
        }
    }
}

async fn load_members(
    store: &dyn RecordStore,
    kind: CollectionKind,
    owner: i64,
) -> anyhow::Result<Vec<i64>> {
    match kind {
        CollectionKind::Follow => store.list_following(owner).await,
        CollectionKind::Follower => store.list_followers(owner).await,
        CollectionKind::Favorite => store.list_favorites(owner).await,
        CollectionKind::CommentIds => store.list_comment_ids(owner).await,
        CollectionKind::PublishIds => store.list_published(owner).await,
    }
}

/// Read-through cache of one collection kind
pub struct CollectionCache {
    kind: CollectionKind,
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn RecordStore>,
    keys: KeySpace,
    ttl: Duration,
    hits: AtomicU64,
    populations: AtomicU64,
}

impl CollectionCache {
    pub fn new(
        kind: CollectionKind,
        cache: Arc<dyn CacheStore>,
        store: Arc<dyn RecordStore>,
        keys: KeySpace,
        ttl: Duration,
    ) -> Self {
        Self {
            kind,
            cache,
            store,
            keys,
            ttl,
            hits: AtomicU64::new(0),
            populations: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    #[must_use]
    pub fn key(&self, owner: i64) -> String {
        self.keys.collection(self.kind, owner)
    }

    /// Inspect the cached set without populating it or touching its TTL
    ///
    /// # Errors
    ///
    /// - [`CacheError::CacheUnavailable`] if a cache command fails
    /// - [`CacheError::MalformedCacheEntry`] if a member is not an id
    pub async fn membership(&self, owner: i64) -> CacheResult<Membership> {
        let key = self.key(owner);
        if !self.is_populated(&key).await? {
            return Ok(Membership::NotCached);
        }
        let raw = self
            .cache
            .list_members(&key)
            .await
            .map_err(CacheError::unavailable)?;
        let mut members = raw
            .iter()
            .filter(|m| m.as_str() != SENTINEL)
            .map(|m| {
                m.parse::<i64>()
                    .map_err(|e| CacheError::malformed(&key, m, e.to_string()))
            })
            .collect::<CacheResult<Vec<_>>>()?;
        members.sort_unstable();
        Ok(Membership::from_members(members))
    }

    /// All member ids of `owner`, ascending, populating the set on a miss
    ///
    /// # Errors
    ///
    /// - [`CacheError::Store`] if the backing query fails
    /// - [`CacheError::CacheUnavailable`] if a cache command fails
    pub async fn read(&self, owner: i64) -> CacheResult<Vec<i64>> {
        let key = self.key(owner);
        match self.membership(owner).await {
            Ok(Membership::NotCached) => {}
            Ok(cached) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.refresh(&key).await?;
                return Ok(cached.into_members());
            }
            Err(e @ CacheError::MalformedCacheEntry { .. }) => {
                warn!(key = %key, error = %e, "Discarding unreadable collection cache");
            }
            Err(e) => return Err(e),
        }
        self.populate(owner).await
    }

    /// Whether `member` belongs to `owner`'s set, populating it first if needed.
    ///
    /// Tests membership against the cache instead of materializing the set.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Store`] if the backing query fails
    /// - [`CacheError::CacheUnavailable`] if a cache command fails
    pub async fn contains(&self, owner: i64, member: i64) -> CacheResult<bool> {
        let key = self.key(owner);
        if self.is_populated(&key).await? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.refresh(&key).await?;
        } else {
            self.populate(owner).await?;
        }
        self.cache
            .is_member(&key, &member.to_string())
            .await
            .map_err(CacheError::unavailable)
    }

    /// Add `member` to `owner`'s set and refresh its TTL.
    ///
    /// Write-path only: the final step of an invalidation sequence. Adding to
    /// a set that is not populated leaves it unpopulated (no sentinel), so the
    /// next read still loads the full membership.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheUnavailable`] if a cache command fails.
    pub async fn add(&self, owner: i64, member: i64) -> CacheResult<()> {
        let key = self.key(owner);
        self.cache
            .add_member(&key, &member.to_string())
            .await
            .map_err(CacheError::unavailable)?;
        self.refresh(&key).await
    }

    /// Remove `member` from `owner`'s set. Write-path only.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheUnavailable`] if the command fails.
    pub async fn remove(&self, owner: i64, member: i64) -> CacheResult<()> {
        self.cache
            .remove_member(&self.key(owner), &member.to_string())
            .await
            .map_err(CacheError::unavailable)
    }

    /// Drop `owner`'s set; idempotent
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheUnavailable`] if the delete fails.
    pub async fn invalidate(&self, owner: i64) -> CacheResult<()> {
        self.cache
            .delete(&self.key(owner))
            .await
            .map_err(CacheError::unavailable)
    }

    /// Replace `owner`'s set with the store of record's current membership
    ///
    /// Members first, sentinel last, then the TTL on the whole set. Any
    /// failure deletes the key before returning.
    async fn populate(&self, owner: i64) -> CacheResult<Vec<i64>> {
        let key = self.key(owner);
        let mut members = load_members(self.store.as_ref(), self.kind, owner)
            .await
            .map_err(CacheError::Store)?;
        members.sort_unstable();
        members.dedup();

        if let Err(e) = self.write_members(&key, &members).await {
            discard_partial(self.cache.as_ref(), &key).await;
            return Err(CacheError::unavailable(e));
        }

        self.populations.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, count = members.len(), "Populated collection cache");
        Ok(members)
    }

    async fn write_members(&self, key: &str, members: &[i64]) -> anyhow::Result<()> {
        self.cache.delete(key).await?;
        for member in members {
            self.cache.add_member(key, &member.to_string()).await?;
        }
        self.cache.add_member(key, SENTINEL).await?;
        self.cache.set_expire(key, self.ttl).await
    }

    async fn is_populated(&self, key: &str) -> CacheResult<bool> {
        self.cache
            .is_member(key, SENTINEL)
            .await
            .map_err(CacheError::unavailable)
    }

    async fn refresh(&self, key: &str) -> CacheResult<()> {
        self.cache
            .set_expire(key, self.ttl)
            .await
            .map_err(CacheError::unavailable)
    }

    /// `(hits, populations)`
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.populations.load(Ordering::Relaxed),
        )
    }
}

/// The five collection caches, sharing one cache store and store of record
pub struct Collections {
    pub follow: CollectionCache,
    pub follower: CollectionCache,
    pub favorite: CollectionCache,
    pub comment_ids: CollectionCache,
    pub publish_ids: CollectionCache,
}

impl Collections {
    pub fn new(
        cache: &Arc<dyn CacheStore>,
        store: &Arc<dyn RecordStore>,
        keys: &KeySpace,
        ttl: Duration,
    ) -> Self {
        let make = |kind| CollectionCache::new(kind, cache.clone(), store.clone(), keys.clone(), ttl);
        Self {
            follow: make(CollectionKind::Follow),
            follower: make(CollectionKind::Follower),
            favorite: make(CollectionKind::Favorite),
            comment_ids: make(CollectionKind::CommentIds),
            publish_ids: make(CollectionKind::PublishIds),
        }
    }

    #[must_use]
    pub fn get(&self, kind: CollectionKind) -> &CollectionCache {
        match kind {
            CollectionKind::Follow => &self.follow,
            CollectionKind::Follower => &self.follower,
            CollectionKind::Favorite => &self.favorite,
            CollectionKind::CommentIds => &self.comment_ids,
            CollectionKind::PublishIds => &self.publish_ids,
        }
    }
}
