//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - In-memory system setup (DashMap cache + memory store)
//! - A racing store wrapper for double-delete and timeline bootstrap tests
//! - Test data generators
//! - Redis helpers for the tests that need a live server

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use anyhow::Result;
use video_cache::error::StoreError;
use video_cache::hash::write_hash;
use video_cache::model::{Comment, NewVideo, User, Video};
use video_cache::store::{Column, StoreOp, Transaction, TxReport};
use video_cache::{
    CacheConfig, CacheStore, DashMapCache, EntityKind, FeedTimeline, KeySpace, MemoryStore,
    RecordStore, SocialService, VideoCacheSystem, async_trait,
};

/// Get Redis URL from environment or use default
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Unique key prefix so Redis-backed tests never share keys
pub fn test_key_prefix() -> String {
    format!("test_{}", rand::random::<u32>())
}

/// An in-memory system plus direct handles to its backends
pub struct Harness<S> {
    pub cache: Arc<DashMapCache>,
    pub store: Arc<S>,
    pub system: VideoCacheSystem,
    pub service: SocialService,
}

pub fn config(ttl: Duration) -> CacheConfig {
    CacheConfig::default().with_ttl(ttl)
}

/// System over a fresh `DashMapCache` and `MemoryStore`
pub fn setup() -> Harness<MemoryStore> {
    setup_with(MemoryStore::new(), config(Duration::from_secs(3600)))
}

pub fn setup_with_ttl(ttl: Duration) -> Harness<MemoryStore> {
    setup_with(MemoryStore::new(), config(ttl))
}

/// System whose store can simulate a racing reader or publisher
pub fn setup_racing() -> Harness<RacingStore> {
    let cache = Arc::new(DashMapCache::new());
    let store = RacingStore::new(cache.clone());
    let harness = build(cache, Arc::new(store), config(Duration::from_secs(3600)));
    harness.store.attach_timeline(&harness.system.timeline);
    harness
}

pub fn setup_with<S: RecordStore + 'static>(store: S, config: CacheConfig) -> Harness<S> {
    build(Arc::new(DashMapCache::new()), Arc::new(store), config)
}

fn build<S: RecordStore + 'static>(
    cache: Arc<DashMapCache>,
    store: Arc<S>,
    config: CacheConfig,
) -> Harness<S> {
    let system = VideoCacheSystem::with_backends(cache.clone(), store.clone(), config)
        .expect("valid test config");
    let service = system.service();
    Harness {
        cache,
        store,
        system,
        service,
    }
}

/// Test data generators
pub mod test_data {
    use super::*;

    /// Create `n` users named `user1..=userN`; ids are `1..=n`
    pub async fn users(store: &dyn RecordStore, n: usize) -> Vec<User> {
        let mut users = Vec::with_capacity(n);
        for i in 1..=n {
            users.push(
                store
                    .create_user(&format!("user{i}"), &format!("hash{i}"))
                    .await
                    .unwrap(),
            );
        }
        users
    }

    pub fn new_video(author: i64, create_time: i64) -> NewVideo {
        NewVideo {
            user_id: author,
            play_url: format!("https://cdn.example/{author}/{create_time}.mp4"),
            cover_url: format!("https://cdn.example/{author}/{create_time}.jpg"),
            title: format!("video by {author} at {create_time}"),
            create_time,
        }
    }

    pub async fn video(store: &dyn RecordStore, author: i64, create_time: i64) -> Video {
        store
            .create_video(new_video(author, create_time))
            .await
            .unwrap()
    }
}

/// A [`RecordStore`] that delegates to [`MemoryStore`] and can, on demand,
/// behave like a concurrent reader racing the next transaction, or fail it.
///
/// When racing, right before the transaction commits it writes the
/// pre-transaction row of every counter the transaction adjusts back into the
/// cache: exactly what a reader that missed between the first delete and the
/// commit would do.
///
/// It can also publish a video right after the next feed snapshot is taken,
/// the way a concurrent publish lands while a bootstrap is still loading.
pub struct RacingStore {
    pub inner: MemoryStore,
    cache: Arc<DashMapCache>,
    keys: KeySpace,
    timeline: OnceLock<Weak<FeedTimeline>>,
    race_next: AtomicBool,
    fail_next: AtomicBool,
    publish_next: Mutex<Option<NewVideo>>,
    published: Mutex<Vec<Video>>,
    races: AtomicU64,
}

impl RacingStore {
    pub fn new(cache: Arc<DashMapCache>) -> Self {
        Self {
            inner: MemoryStore::new(),
            cache,
            keys: KeySpace::default(),
            timeline: OnceLock::new(),
            race_next: AtomicBool::new(false),
            fail_next: AtomicBool::new(false),
            publish_next: Mutex::new(None),
            published: Mutex::new(Vec::new()),
            races: AtomicU64::new(0),
        }
    }

    pub fn attach_timeline(&self, timeline: &Arc<FeedTimeline>) {
        let _ = self.timeline.set(Arc::downgrade(timeline));
    }

    /// Create `video` and append it to the timeline right after the next
    /// feed snapshot
    pub fn publish_during_next_feed_snapshot(&self, video: NewVideo) {
        *self.publish_next.lock().unwrap() = Some(video);
    }

    /// Videos published by [`publish_during_next_feed_snapshot`](Self::publish_during_next_feed_snapshot)
    pub fn published(&self) -> Vec<Video> {
        self.published.lock().unwrap().clone()
    }

    /// Repopulate stale entries right before the next transaction
    pub fn race_next_transaction(&self) {
        self.race_next.store(true, Ordering::SeqCst);
    }

    /// Abort the next transaction with a backend error
    pub fn fail_next_transaction(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of stale entries written by simulated readers
    pub fn races(&self) -> u64 {
        self.races.load(Ordering::SeqCst)
    }

    async fn repopulate_stale(&self, tx: &Transaction) -> Result<()> {
        for op in tx.ops() {
            let StoreOp::Adjust { column, id, .. } = op else {
                continue;
            };
            match column {
                Column::VideoFavoriteCount | Column::VideoCommentCount => {
                    if let Some(video) = self.inner.peek_video(*id) {
                        let key = self.keys.entity(EntityKind::Video, *id);
                        write_hash(self.cache.as_ref(), &key, &video).await?;
                    }
                }
                Column::UserFollowCount | Column::UserFollowerCount => {
                    if let Some(user) = self.inner.peek_user(*id) {
                        let key = self.keys.entity(EntityKind::User, *id);
                        write_hash(self.cache.as_ref(), &key, &user).await?;
                    }
                }
            }
            self.races.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for RacingStore {
    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.inner.get_user(id).await
    }

    async fn get_video(&self, id: i64) -> Result<Option<Video>> {
        self.inner.get_video(id).await
    }

    async fn get_comment(&self, id: i64) -> Result<Option<Comment>> {
        self.inner.get_comment(id).await
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>> {
        self.inner.find_user_by_name(name).await
    }

    async fn list_following(&self, user_id: i64) -> Result<Vec<i64>> {
        self.inner.list_following(user_id).await
    }

    async fn list_followers(&self, user_id: i64) -> Result<Vec<i64>> {
        self.inner.list_followers(user_id).await
    }

    async fn list_favorites(&self, user_id: i64) -> Result<Vec<i64>> {
        self.inner.list_favorites(user_id).await
    }

    async fn list_comment_ids(&self, video_id: i64) -> Result<Vec<i64>> {
        self.inner.list_comment_ids(video_id).await
    }

    async fn list_published(&self, user_id: i64) -> Result<Vec<i64>> {
        self.inner.list_published(user_id).await
    }

    async fn list_feed(&self, latest_time: i64, limit: usize) -> Result<Vec<Video>> {
        let snapshot = self.inner.list_feed(latest_time, limit).await?;
        let pending = self.publish_next.lock().unwrap().take();
        if let Some(new) = pending {
            let video = self.inner.create_video(new).await?;
            if let Some(timeline) = self.timeline.get().and_then(Weak::upgrade) {
                timeline.append(&video).await?;
            }
            self.published.lock().unwrap().push(video);
        }
        Ok(snapshot)
    }

    async fn create_user(&self, name: &str, password_hash: &str) -> Result<User> {
        self.inner.create_user(name, password_hash).await
    }

    async fn create_video(&self, video: NewVideo) -> Result<Video> {
        self.inner.create_video(video).await
    }

    async fn run_transaction(&self, tx: Transaction) -> Result<TxReport, StoreError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!("injected transaction failure")));
        }
        if self.race_next.swap(false, Ordering::SeqCst) {
            self.repopulate_stale(&tx).await?;
        }
        self.inner.run_transaction(tx).await
    }
}

/// Whether the cache currently holds an entry for `(kind, id)`
pub async fn cached(cache: &DashMapCache, kind: EntityKind, id: i64) -> bool {
    cache
        .exists(&KeySpace::default().entity(kind, id))
        .await
        .unwrap()
}
