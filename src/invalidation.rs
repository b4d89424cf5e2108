//! Invalidation Coordinator - delayed double-delete
//!
//! Every mutation runs the same strictly ordered sequence:
//!
//! ```text
//! Start -> FirstDelete -> StoreMutation -> SecondDelete -> CacheWriteback -> Done
//! ```
//!
//! 1. delete every entity hash the mutation makes stale
//! 2. run the store-of-record transaction (edge row + counters)
//! 3. delete the same hashes again, evicting anything a concurrent reader
//!    repopulated from the pre-commit state
//! 4. write the new edge into the collection caches
//!
//! A failing step stops the sequence and is returned. A failed transaction
//! committed nothing, so there is nothing to reflect; the hashes deleted in
//! step 1 repopulate from the unchanged store on the next read.
//!
//! A reader repopulating between steps 3 and 4 can still cache a stale value.
//! That residual window is bounded by the TTL.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, warn};

use crate::collection::Collections;
use crate::entity::{CommentCache, VideoCache};
use crate::error::{CacheError, CacheResult};
use crate::keys::{CollectionKind, EntityKind, KeySpace};
use crate::model::{NewComment, NewVideo, Video};
use crate::store::{Column, StoreOp, Transaction, TxReport};
use crate::timeline::FeedTimeline;
use crate::traits::{CacheStore, RecordStore};

/// Steps of the double-delete sequence that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    FirstDelete,
    StoreMutation,
    SecondDelete,
    CacheWriteback,
}

/// Final collection-cache update of a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writeback {
    Add {
        kind: CollectionKind,
        owner: i64,
        member: i64,
    },
    Remove {
        kind: CollectionKind,
        owner: i64,
        member: i64,
    },
    /// Cache the comment created by the transaction and add it to its
    /// video's comment-id set
    CreatedComment,
}

/// A store-of-record mutation together with its cache footprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    name: &'static str,
    stale: Vec<(EntityKind, i64)>,
    tx: Transaction,
    writeback: Vec<Writeback>,
}

impl Mutation {
    pub fn favorite(user_id: i64, video_id: i64) -> Self {
        Self {
            name: "favorite",
            stale: vec![(EntityKind::Video, video_id)],
            tx: Transaction::new()
                .then(StoreOp::InsertFavorite { user_id, video_id })
                .adjust(Column::VideoFavoriteCount, video_id, 1),
            writeback: vec![Writeback::Add {
                kind: CollectionKind::Favorite,
                owner: user_id,
                member: video_id,
            }],
        }
    }

    pub fn unfavorite(user_id: i64, video_id: i64) -> Self {
        Self {
            name: "unfavorite",
            stale: vec![(EntityKind::Video, video_id)],
            tx: Transaction::new()
                .then(StoreOp::DeleteFavorite { user_id, video_id })
                .adjust(Column::VideoFavoriteCount, video_id, -1),
            writeback: vec![Writeback::Remove {
                kind: CollectionKind::Favorite,
                owner: user_id,
                member: video_id,
            }],
        }
    }

    /// `follower` starts following `followee`. Both users' hashes are stale;
    /// each collection gets the other party's id.
    pub fn follow(follower: i64, followee: i64) -> Self {
        Self {
            name: "follow",
            stale: vec![(EntityKind::User, follower), (EntityKind::User, followee)],
            tx: Transaction::new()
                .then(StoreOp::InsertRelation { follower, followee })
                .adjust(Column::UserFollowCount, follower, 1)
                .adjust(Column::UserFollowerCount, followee, 1),
            writeback: vec![
                Writeback::Add {
                    kind: CollectionKind::Follow,
                    owner: follower,
                    member: followee,
                },
                Writeback::Add {
                    kind: CollectionKind::Follower,
                    owner: followee,
                    member: follower,
                },
            ],
        }
    }

    pub fn unfollow(follower: i64, followee: i64) -> Self {
        Self {
            name: "unfollow",
            stale: vec![(EntityKind::User, follower), (EntityKind::User, followee)],
            tx: Transaction::new()
                .then(StoreOp::DeleteRelation { follower, followee })
                .adjust(Column::UserFollowCount, follower, -1)
                .adjust(Column::UserFollowerCount, followee, -1),
            writeback: vec![
                Writeback::Remove {
                    kind: CollectionKind::Follow,
                    owner: follower,
                    member: followee,
                },
                Writeback::Remove {
                    kind: CollectionKind::Follower,
                    owner: followee,
                    member: follower,
                },
            ],
        }
    }

    pub fn add_comment(comment: NewComment) -> Self {
        let video_id = comment.video_id;
        Self {
            name: "add_comment",
            stale: vec![(EntityKind::Video, video_id)],
            tx: Transaction::new()
                .then(StoreOp::InsertComment(comment))
                .adjust(Column::VideoCommentCount, video_id, 1),
            writeback: vec![Writeback::CreatedComment],
        }
    }

    /// Delete comment `comment_id` on `video_id`; the transaction aborts
    /// unless `owner` wrote it
    pub fn delete_comment(comment_id: i64, video_id: i64, owner: i64) -> Self {
        Self {
            name: "delete_comment",
            stale: vec![
                (EntityKind::Video, video_id),
                (EntityKind::Comment, comment_id),
            ],
            tx: Transaction::new()
                .then(StoreOp::DeleteComment { comment_id, owner })
                .adjust(Column::VideoCommentCount, video_id, -1),
            writeback: vec![Writeback::Remove {
                kind: CollectionKind::CommentIds,
                owner: video_id,
                member: comment_id,
            }],
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Entity hashes deleted in steps 1 and 3
    #[must_use]
    pub fn stale(&self) -> &[(EntityKind, i64)] {
        &self.stale
    }

    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    #[must_use]
    pub fn writeback(&self) -> &[Writeback] {
        &self.writeback
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Statistics for invalidation sequences
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationStats {
    /// Sequences entered
    pub started: u64,
    /// Sequences that reached `Done`
    pub completed: u64,
    pub first_delete_failures: u64,
    /// Aborted transactions, business rejections included
    pub store_mutation_failures: u64,
    pub second_delete_failures: u64,
    pub writeback_failures: u64,
    /// Cache updates after a publish that failed and were skipped
    pub publish_cache_failures: u64,
}

/// Thread-safe statistics for invalidation sequences
#[derive(Debug, Default)]
pub struct AtomicInvalidationStats {
    pub started: AtomicU64,
    pub completed: AtomicU64,
    pub first_delete_failures: AtomicU64,
    pub store_mutation_failures: AtomicU64,
    pub second_delete_failures: AtomicU64,
    pub writeback_failures: AtomicU64,
    pub publish_cache_failures: AtomicU64,
}

impl AtomicInvalidationStats {
    pub fn snapshot(&self) -> InvalidationStats {
        InvalidationStats {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            first_delete_failures: self.first_delete_failures.load(Ordering::Relaxed),
            store_mutation_failures: self.store_mutation_failures.load(Ordering::Relaxed),
            second_delete_failures: self.second_delete_failures.load(Ordering::Relaxed),
            writeback_failures: self.writeback_failures.load(Ordering::Relaxed),
            publish_cache_failures: self.publish_cache_failures.load(Ordering::Relaxed),
        }
    }

    fn record_failure(&self, step: Step) {
        let counter = match step {
            Step::FirstDelete => &self.first_delete_failures,
            Step::StoreMutation => &self.store_mutation_failures,
            Step::SecondDelete => &self.second_delete_failures,
            Step::CacheWriteback => &self.writeback_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Runs mutations through the double-delete sequence
pub struct InvalidationCoordinator {
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn RecordStore>,
    keys: KeySpace,
    videos: Arc<VideoCache>,
    comments: Arc<CommentCache>,
    collections: Arc<Collections>,
    timeline: Arc<FeedTimeline>,
    stats: Arc<AtomicInvalidationStats>,
}

impl InvalidationCoordinator {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        store: Arc<dyn RecordStore>,
        keys: KeySpace,
        videos: Arc<VideoCache>,
        comments: Arc<CommentCache>,
        collections: Arc<Collections>,
        timeline: Arc<FeedTimeline>,
    ) -> Self {
        Self {
            cache,
            store,
            keys,
            videos,
            comments,
            collections,
            timeline,
            stats: Arc::new(AtomicInvalidationStats::default()),
        }
    }

    /// Run `mutation` through all four steps, in order.
    ///
    /// # Errors
    ///
    /// - [`CacheError::StoreMutationFailed`] if the transaction aborts; no
    ///   later step runs
    /// - [`CacheError::CacheUnavailable`] if a delete or writeback fails
    pub async fn execute(&self, mutation: Mutation) -> CacheResult<TxReport> {
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        let Mutation {
            name,
            stale,
            tx,
            writeback,
        } = mutation;

        self.delete_stale(&stale)
            .await
            .map_err(|e| self.failed(name, Step::FirstDelete, e))?;

        let report = self
            .store
            .run_transaction(tx)
            .await
            .map_err(|e| self.failed(name, Step::StoreMutation, e.into()))?;

        self.delete_stale(&stale)
            .await
            .map_err(|e| self.failed(name, Step::SecondDelete, e))?;

        self.apply_writeback(&writeback, &report)
            .await
            .map_err(|e| self.failed(name, Step::CacheWriteback, e))?;

        self.stats.completed.fetch_add(1, Ordering::Relaxed);
        debug!(mutation = name, rows = report.rows_affected, "Invalidation sequence completed");
        Ok(report)
    }

    async fn delete_stale(&self, stale: &[(EntityKind, i64)]) -> CacheResult<()> {
        for (kind, id) in stale {
            let key = self.keys.entity(*kind, *id);
            self.cache
                .delete(&key)
                .await
                .map_err(CacheError::unavailable)?;
        }
        Ok(())
    }

    async fn apply_writeback(&self, writeback: &[Writeback], report: &TxReport) -> CacheResult<()> {
        for step in writeback {
            match *step {
                Writeback::Add {
                    kind,
                    owner,
                    member,
                } => self.collections.get(kind).add(owner, member).await?,
                Writeback::Remove {
                    kind,
                    owner,
                    member,
                } => self.collections.get(kind).remove(owner, member).await?,
                Writeback::CreatedComment => {
                    if let Some(comment) = &report.created_comment {
                        self.comments.write_through(comment).await?;
                        self.collections
                            .comment_ids
                            .add(comment.video_id, comment.id)
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    fn failed(&self, mutation: &'static str, step: Step, err: CacheError) -> CacheError {
        self.stats.record_failure(step);
        if matches!(&err, CacheError::StoreMutationFailed(e) if e.is_rejection()) {
            debug!(mutation, step = ?step, error = %err, "Store mutation rejected");
        } else {
            error!(mutation, step = ?step, error = %err, "Invalidation sequence failed");
        }
        err
    }

    /// Create a video and reflect it in the cache.
    ///
    /// The new id has no cache entries yet, so there is nothing to delete:
    /// the video is appended to the timeline, written through to its entity
    /// hash and added to the author's publish-id set. Those cache updates are
    /// logged on failure but not returned, since the next read self-heals.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`] if the store of record rejects the video.
    pub async fn publish(&self, video: NewVideo) -> CacheResult<Video> {
        let video = self
            .store
            .create_video(video)
            .await
            .map_err(CacheError::Store)?;

        let results = [
            ("timeline", self.timeline.append(&video).await),
            ("video", self.videos.write_through(&video).await),
            (
                "publish_ids",
                self.collections
                    .publish_ids
                    .add(video.user_id, video.id)
                    .await,
            ),
        ];
        for (what, result) in results {
            if let Err(e) = result {
                self.stats
                    .publish_cache_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(video_id = video.id, what, error = %e, "Cache update after publish failed");
            }
        }

        debug!(video_id = video.id, user_id = video.user_id, "Published video");
        Ok(video)
    }

    pub fn stats(&self) -> InvalidationStats {
        self.stats.snapshot()
    }
}
