//! In-memory store of record
//!
//! A `parking_lot`-guarded set of tables with auto-increment ids. Transactions
//! are applied to a staged copy that replaces the live tables only when every
//! operation succeeded, so a failed transaction leaves no trace.
//!
//! Every read method bumps a counter ([`MemoryStore::read_count`]), which tests
//! use to prove that a warm cache does not reach the store.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::StoreError;
use crate::keys::EntityKind;
use crate::model::{Comment, NewVideo, User, Video};
use crate::store::{Column, StoreOp, Transaction, TxReport};
use crate::traits::RecordStore;

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    videos: BTreeMap<i64, Video>,
    comments: BTreeMap<i64, Comment>,
    /// (user_id, video_id)
    favorites: BTreeSet<(i64, i64)>,
    /// (follower, followee)
    relations: BTreeSet<(i64, i64)>,
    last_user_id: i64,
    last_video_id: i64,
    last_comment_id: i64,
}

impl Tables {
    fn apply(&mut self, op: StoreOp, report: &mut TxReport) -> Result<(), StoreError> {
        match op {
            StoreOp::InsertFavorite { user_id, video_id } => {
                self.require_user(user_id)?;
                self.require_video(video_id)?;
                if !self.favorites.insert((user_id, video_id)) {
                    return Err(StoreError::EdgeExists);
                }
            }
            StoreOp::DeleteFavorite { user_id, video_id } => {
                if !self.favorites.remove(&(user_id, video_id)) {
                    return Err(StoreError::EdgeMissing);
                }
            }
            StoreOp::InsertRelation { follower, followee } => {
                self.require_user(follower)?;
                self.require_user(followee)?;
                if !self.relations.insert((follower, followee)) {
                    return Err(StoreError::EdgeExists);
                }
            }
            StoreOp::DeleteRelation { follower, followee } => {
                if !self.relations.remove(&(follower, followee)) {
                    return Err(StoreError::EdgeMissing);
                }
            }
            StoreOp::InsertComment(new) => {
                self.require_user(new.user_id)?;
                self.require_video(new.video_id)?;
                self.last_comment_id += 1;
                let comment = Comment {
                    id: self.last_comment_id,
                    user_id: new.user_id,
                    video_id: new.video_id,
                    content: new.content,
                    create_date: new.create_date,
                };
                self.comments.insert(comment.id, comment.clone());
                report.created_comment = Some(comment);
            }
            StoreOp::DeleteComment { comment_id, owner } => {
                let comment = self
                    .comments
                    .get(&comment_id)
                    .ok_or(StoreError::RecordMissing {
                        kind: EntityKind::Comment,
                        id: comment_id,
                    })?;
                if comment.user_id != owner {
                    return Err(StoreError::NotOwner);
                }
                report.deleted_comment = self.comments.remove(&comment_id);
            }
            StoreOp::Adjust { column, id, delta } => {
                let slot = self.counter_mut(column, id)?;
                let updated = *slot + delta;
                if updated < 0 {
                    return Err(StoreError::CounterUnderflow {
                        column: column.name(),
                        id,
                    });
                }
                *slot = updated;
            }
        }
        report.rows_affected += 1;
        Ok(())
    }

    fn require_user(&self, id: i64) -> Result<(), StoreError> {
        if self.users.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::RecordMissing {
                kind: EntityKind::User,
                id,
            })
        }
    }

    fn require_video(&self, id: i64) -> Result<(), StoreError> {
        if self.videos.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::RecordMissing {
                kind: EntityKind::Video,
                id,
            })
        }
    }

    fn counter_mut(&mut self, column: Column, id: i64) -> Result<&mut i64, StoreError> {
        match column {
            Column::VideoFavoriteCount | Column::VideoCommentCount => {
                let video = self.videos.get_mut(&id).ok_or(StoreError::RecordMissing {
                    kind: EntityKind::Video,
                    id,
                })?;
                Ok(if column == Column::VideoFavoriteCount {
                    &mut video.favorite_count
                } else {
                    &mut video.comment_count
                })
            }
            Column::UserFollowCount | Column::UserFollowerCount => {
                let user = self.users.get_mut(&id).ok_or(StoreError::RecordMissing {
                    kind: EntityKind::User,
                    id,
                })?;
                Ok(if column == Column::UserFollowCount {
                    &mut user.follow_count
                } else {
                    &mut user.follower_count
                })
            }
        }
    }
}

/// In-memory [`RecordStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    reads: AtomicU64,
    transactions: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read calls served so far
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of committed transactions
    pub fn transaction_count(&self) -> u64 {
        self.transactions.load(Ordering::Relaxed)
    }

    /// Current row for `id`, without counting as a read
    pub fn peek_user(&self, id: i64) -> Option<User> {
        self.tables.lock().users.get(&id).cloned()
    }

    /// Current row for `id`, without counting as a read
    pub fn peek_video(&self, id: i64) -> Option<Video> {
        self.tables.lock().videos.get(&id).cloned()
    }

    fn read(&self) -> parking_lot::MutexGuard<'_, Tables> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.tables.lock()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.read().users.get(&id).cloned())
    }

    async fn get_video(&self, id: i64) -> Result<Option<Video>> {
        Ok(self.read().videos.get(&id).cloned())
    }

    async fn get_comment(&self, id: i64) -> Result<Option<Comment>> {
        Ok(self.read().comments.get(&id).cloned())
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>> {
        Ok(self.read().users.values().find(|u| u.name == name).cloned())
    }

    async fn list_following(&self, user_id: i64) -> Result<Vec<i64>> {
        Ok(self
            .read()
            .relations
            .iter()
            .filter(|(follower, _)| *follower == user_id)
            .map(|(_, followee)| *followee)
            .collect())
    }

    async fn list_followers(&self, user_id: i64) -> Result<Vec<i64>> {
        Ok(self
            .read()
            .relations
            .iter()
            .filter(|(_, followee)| *followee == user_id)
            .map(|(follower, _)| *follower)
            .collect())
    }

    async fn list_favorites(&self, user_id: i64) -> Result<Vec<i64>> {
        Ok(self
            .read()
            .favorites
            .iter()
            .filter(|(user, _)| *user == user_id)
            .map(|(_, video)| *video)
            .collect())
    }

    async fn list_comment_ids(&self, video_id: i64) -> Result<Vec<i64>> {
        Ok(self
            .read()
            .comments
            .values()
            .filter(|c| c.video_id == video_id)
            .map(|c| c.id)
            .collect())
    }

    async fn list_published(&self, user_id: i64) -> Result<Vec<i64>> {
        Ok(self
            .read()
            .videos
            .values()
            .filter(|v| v.user_id == user_id)
            .map(|v| v.id)
            .collect())
    }

    async fn list_feed(&self, latest_time: i64, limit: usize) -> Result<Vec<Video>> {
        let tables = self.read();
        let mut videos: Vec<Video> = tables
            .videos
            .values()
            .filter(|v| v.create_time <= latest_time)
            .cloned()
            .collect();
        videos.sort_by(|a, b| b.create_time.cmp(&a.create_time).then(b.id.cmp(&a.id)));
        videos.truncate(limit);
        Ok(videos)
    }

    async fn create_user(&self, name: &str, password_hash: &str) -> Result<User> {
        let mut tables = self.tables.lock();
        if tables.users.values().any(|u| u.name == name) {
            anyhow::bail!("unique constraint violated: user name '{name}' already exists");
        }
        tables.last_user_id += 1;
        let user = User {
            id: tables.last_user_id,
            name: name.to_string(),
            password: password_hash.to_string(),
            follow_count: 0,
            follower_count: 0,
        };
        tables.users.insert(user.id, user.clone());
        debug!(user_id = user.id, "[Memory] Created user");
        Ok(user)
    }

    async fn create_video(&self, video: NewVideo) -> Result<Video> {
        let mut tables = self.tables.lock();
        if !tables.users.contains_key(&video.user_id) {
            anyhow::bail!("foreign key violated: user {} does not exist", video.user_id);
        }
        tables.last_video_id += 1;
        let video = Video {
            id: tables.last_video_id,
            user_id: video.user_id,
            play_url: video.play_url,
            cover_url: video.cover_url,
            favorite_count: 0,
            comment_count: 0,
            title: video.title,
            create_time: video.create_time,
        };
        tables.videos.insert(video.id, video.clone());
        debug!(video_id = video.id, "[Memory] Created video");
        Ok(video)
    }

    async fn run_transaction(&self, tx: Transaction) -> Result<TxReport, StoreError> {
        let mut tables = self.tables.lock();
        let mut staged = tables.clone();
        let mut report = TxReport::default();
        for op in tx.into_ops() {
            staged.apply(op, &mut report)?;
        }
        *tables = staged;
        self.transactions.fetch_add(1, Ordering::Relaxed);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewComment;

    async fn seeded() -> (MemoryStore, User, User, Video) {
        let store = MemoryStore::new();
        let alice = store.create_user("alice", "h1").await.unwrap();
        let bob = store.create_user("bob", "h2").await.unwrap();
        let video = store
            .create_video(NewVideo {
                user_id: bob.id,
                play_url: "play".to_string(),
                cover_url: "cover".to_string(),
                title: "t".to_string(),
                create_time: 100,
            })
            .await
            .unwrap();
        (store, alice, bob, video)
    }

    #[tokio::test]
    async fn test_transaction_commits_all_ops() {
        let (store, alice, _, video) = seeded().await;
        let tx = Transaction::new()
            .then(StoreOp::InsertFavorite {
                user_id: alice.id,
                video_id: video.id,
            })
            .adjust(Column::VideoFavoriteCount, video.id, 1);
        let report = store.run_transaction(tx).await.unwrap();
        assert_eq!(report.rows_affected, 2);
        assert_eq!(store.peek_video(video.id).unwrap().favorite_count, 1);
        assert_eq!(store.list_favorites(alice.id).await.unwrap(), vec![video.id]);
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let (store, alice, _, video) = seeded().await;
        // Counter bump first, then a delete of a missing edge
        let tx = Transaction::new()
            .adjust(Column::VideoFavoriteCount, video.id, 1)
            .then(StoreOp::DeleteFavorite {
                user_id: alice.id,
                video_id: video.id,
            });
        let err = store.run_transaction(tx).await.unwrap_err();
        assert!(matches!(err, StoreError::EdgeMissing));
        assert_eq!(store.peek_video(video.id).unwrap().favorite_count, 0);
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_counter_never_negative() {
        let (store, _, _, video) = seeded().await;
        let tx = Transaction::new().adjust(Column::VideoCommentCount, video.id, -1);
        let err = store.run_transaction(tx).await.unwrap_err();
        assert!(matches!(err, StoreError::CounterUnderflow { .. }));
    }

    #[tokio::test]
    async fn test_delete_comment_checks_owner() {
        let (store, alice, bob, video) = seeded().await;
        let report = store
            .run_transaction(Transaction::new().then(StoreOp::InsertComment(NewComment::now(
                alice.id, video.id, "hi",
            ))))
            .await
            .unwrap();
        let comment = report.created_comment.unwrap();

        let err = store
            .run_transaction(Transaction::new().then(StoreOp::DeleteComment {
                comment_id: comment.id,
                owner: bob.id,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotOwner));

        let report = store
            .run_transaction(Transaction::new().then(StoreOp::DeleteComment {
                comment_id: comment.id,
                owner: alice.id,
            }))
            .await
            .unwrap();
        assert_eq!(report.deleted_comment.map(|c| c.id), Some(comment.id));
    }

    #[tokio::test]
    async fn test_feed_is_newest_first_and_bounded() {
        let (store, _, bob, _) = seeded().await;
        for t in [300, 200, 400] {
            store
                .create_video(NewVideo {
                    user_id: bob.id,
                    play_url: String::new(),
                    cover_url: String::new(),
                    title: String::new(),
                    create_time: t,
                })
                .await
                .unwrap();
        }
        let feed = store.list_feed(350, 2).await.unwrap();
        let times: Vec<_> = feed.iter().map(|v| v.create_time).collect();
        assert_eq!(times, vec![300, 200]);
    }

    #[tokio::test]
    async fn test_read_counter() {
        let (store, alice, _, _) = seeded().await;
        let before = store.read_count();
        store.get_user(alice.id).await.unwrap();
        store.list_following(alice.id).await.unwrap();
        assert_eq!(store.read_count() - before, 2);
        store.peek_user(alice.id);
        assert_eq!(store.read_count() - before, 2);
    }

    #[tokio::test]
    async fn test_duplicate_user_name_rejected() {
        let (store, _, _, _) = seeded().await;
        assert!(store.create_user("alice", "x").await.is_err());
    }
}
