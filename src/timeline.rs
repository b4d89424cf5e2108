//! Feed Timeline Cache
//!
//! One global sorted set: member = video id, score = creation time. The
//! [`SENTINEL`] member, scored above any creation time, marks the set as
//! bootstrapped and is written last. The timeline is bootstrapped from the
//! store of record once (at startup, or lazily by the first read that finds
//! no sentinel) and appended to on every publish, populated or not.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::try_join_all;
use tracing::{debug, info, warn};

use crate::collection::{Collections, SENTINEL};
use crate::entity::{UserCache, VideoCache};
use crate::error::{CacheError, CacheResult};
use crate::keys::KeySpace;
use crate::model::{Video, unix_now};
use crate::traits::{CacheStore, RecordStore};

/// Outcome of [`FeedTimeline::bootstrap`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// The timeline already existed; nothing was loaded
    pub already_populated: bool,
    /// Videos inserted into the timeline
    pub inserted: usize,
    /// Eager entity/collection populations that failed and were skipped
    pub eager_failures: usize,
}

#[allow(clippy::cast_precision_loss)]
fn score(create_time: i64) -> f64 {
    create_time as f64
}

/// Score of the sentinel; no `latest_time` bound ever reaches it
const SENTINEL_SCORE: f64 = f64::MAX;

pub struct FeedTimeline {
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn RecordStore>,
    key: String,
    ttl: Duration,
    max_feed_size: usize,
    max_bootstrap: usize,
    videos: Arc<VideoCache>,
    users: Arc<UserCache>,
    collections: Arc<Collections>,
}

impl FeedTimeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<dyn CacheStore>,
        store: Arc<dyn RecordStore>,
        keys: &KeySpace,
        ttl: Duration,
        max_feed_size: usize,
        max_bootstrap: usize,
        videos: Arc<VideoCache>,
        users: Arc<UserCache>,
        collections: Arc<Collections>,
    ) -> Self {
        Self {
            cache,
            store,
            key: keys.timeline(),
            ttl,
            max_feed_size,
            max_bootstrap,
            videos,
            users,
            collections,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Largest page a single read returns
    #[must_use]
    pub fn max_feed_size(&self) -> usize {
        self.max_feed_size
    }

    /// Whether a bootstrap completed on the current timeline key
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheUnavailable`] if the lookup fails.
    pub async fn is_populated(&self) -> CacheResult<bool> {
        self.cache
            .score(&self.key, SENTINEL)
            .await
            .map(|score| score.is_some())
            .map_err(CacheError::unavailable)
    }

    async fn refresh(&self) -> CacheResult<()> {
        self.cache
            .set_expire(&self.key, self.ttl)
            .await
            .map_err(CacheError::unavailable)
    }

    /// Load the most recent videos (up to the bootstrap window) into the
    /// timeline if it is not populated yet, and eagerly warm each video's
    /// entity hash, its comment-id set and its author's user hash and
    /// relationship sets.
    ///
    /// Existing members are kept: a video appended while the window was being
    /// loaded stays in the timeline.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Store`] if the feed query fails
    /// - [`CacheError::CacheUnavailable`] if writing the timeline itself
    ///   fails; the sentinel is not written, so the next read retries
    ///
    /// Eager population failures are logged and counted, never returned.
    pub async fn bootstrap(&self, latest_time: i64) -> CacheResult<BootstrapReport> {
        if self.is_populated().await? {
            debug!(key = %self.key, "Timeline already populated, skipping bootstrap");
            return Ok(BootstrapReport {
                already_populated: true,
                ..BootstrapReport::default()
            });
        }

        let videos = self
            .store
            .list_feed(latest_time, self.max_bootstrap)
            .await
            .map_err(CacheError::Store)?;

        self.insert_all(&videos)
            .await
            .map_err(CacheError::unavailable)?;

        let mut eager_failures = 0;
        for video in &videos {
            eager_failures += self.warm(video).await;
        }

        info!(
            inserted = videos.len(),
            eager_failures,
            latest_time,
            "Bootstrapped feed timeline"
        );
        Ok(BootstrapReport {
            already_populated: false,
            inserted: videos.len(),
            eager_failures,
        })
    }

    async fn insert_all(&self, videos: &[Video]) -> anyhow::Result<()> {
        for video in videos {
            self.cache
                .add_scored(&self.key, &video.id.to_string(), score(video.create_time))
                .await?;
        }
        self.cache
            .add_scored(&self.key, SENTINEL, SENTINEL_SCORE)
            .await?;
        self.cache.set_expire(&self.key, self.ttl).await
    }

    /// Warm the caches around one video; returns the number of failures
    async fn warm(&self, video: &Video) -> usize {
        let author = video.user_id;
        let results = [
            ("video", self.videos.write_through(video).await),
            (
                "comment_ids",
                self.collections.comment_ids.read(video.id).await.map(drop),
            ),
            ("author", self.users.read(author).await.map(drop)),
            ("follow", self.collections.follow.read(author).await.map(drop)),
            (
                "follower",
                self.collections.follower.read(author).await.map(drop),
            ),
            (
                "favorite",
                self.collections.favorite.read(author).await.map(drop),
            ),
        ];

        let mut failures = 0;
        for (what, result) in results {
            if let Err(e) = result {
                failures += 1;
                warn!(video_id = video.id, user_id = author, what, error = %e, "Eager cache population failed, skipping");
            }
        }
        failures
    }

    /// Insert a freshly published video.
    ///
    /// Unconditional: on a timeline without the sentinel the member waits
    /// there for the next bootstrap, which keeps it.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheUnavailable`] if a cache command fails.
    pub async fn append(&self, video: &Video) -> CacheResult<()> {
        self.cache
            .add_scored(&self.key, &video.id.to_string(), score(video.create_time))
            .await
            .map_err(CacheError::unavailable)?;
        debug!(video_id = video.id, create_time = video.create_time, "Appended video to timeline");
        self.refresh().await
    }

    /// Ids of up to `limit` videos created at or before `latest_time`,
    /// newest first. `limit` is capped at the configured feed size.
    ///
    /// # Errors
    ///
    /// - [`CacheError::CacheUnavailable`] if a cache command fails
    /// - [`CacheError::Store`] if a lazy bootstrap's feed query fails
    pub async fn read(&self, latest_time: i64, limit: usize) -> CacheResult<Vec<i64>> {
        if !self.is_populated().await? {
            self.bootstrap(unix_now()).await?;
        }

        let limit = limit.min(self.max_feed_size);
        let raw = self
            .cache
            .range_by_score_desc(&self.key, score(latest_time), limit)
            .await
            .map_err(CacheError::unavailable)?;
        self.refresh().await?;

        Ok(raw
            .iter()
            .filter_map(|member| match member.parse::<i64>() {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(key = %self.key, member = %member, error = %e, "Skipping unparsable timeline member");
                    None
                }
            })
            .collect())
    }

    /// [`read`](Self::read), with each id resolved through the video cache
    ///
    /// # Errors
    ///
    /// As [`read`](Self::read), plus any error of the video cache.
    pub async fn read_videos(&self, latest_time: i64, limit: usize) -> CacheResult<Vec<Video>> {
        let ids = self.read(latest_time, limit).await?;
        try_join_all(ids.into_iter().map(|id| self.videos.read(id))).await
    }
}
