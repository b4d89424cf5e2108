//! Store-of-record transactions
//!
//! A [`Transaction`] is an ordered list of [`StoreOp`]s that a
//! [`RecordStore`](crate::traits::RecordStore) applies atomically: an edge
//! insert or delete together with the counter adjustments it implies.

pub mod memory;

pub use memory::MemoryStore;

use crate::model::{Comment, NewComment};

/// Denormalized counter columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    VideoFavoriteCount,
    VideoCommentCount,
    UserFollowCount,
    UserFollowerCount,
}

impl Column {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::VideoFavoriteCount => "favorite_count",
            Self::VideoCommentCount => "comment_count",
            Self::UserFollowCount => "follow_count",
            Self::UserFollowerCount => "follower_count",
        }
    }
}

/// One step of a store-of-record transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Fails with `EdgeExists` if the like is already recorded
    InsertFavorite { user_id: i64, video_id: i64 },
    /// Fails with `EdgeMissing` if there is no such like
    DeleteFavorite { user_id: i64, video_id: i64 },
    /// `follower` starts following `followee`
    InsertRelation { follower: i64, followee: i64 },
    DeleteRelation { follower: i64, followee: i64 },
    /// The created row is returned in [`TxReport::created_comment`]
    InsertComment(NewComment),
    /// Fails with `NotOwner` unless `owner` wrote the comment
    DeleteComment { comment_id: i64, owner: i64 },
    /// `UPDATE ... SET column = column + delta WHERE id = id`
    Adjust { column: Column, id: i64, delta: i64 },
}

/// Builder for an atomic batch of [`StoreOp`]s
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    ops: Vec<StoreOp>,
}

impl Transaction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn then(mut self, op: StoreOp) -> Self {
        self.ops.push(op);
        self
    }

    #[must_use]
    pub fn adjust(self, column: Column, id: i64, delta: i64) -> Self {
        self.then(StoreOp::Adjust { column, id, delta })
    }

    #[must_use]
    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    #[must_use]
    pub fn into_ops(self) -> Vec<StoreOp> {
        self.ops
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Rows produced or removed by a committed transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxReport {
    pub created_comment: Option<Comment>,
    pub deleted_comment: Option<Comment>,
    /// Number of rows inserted, deleted or updated
    pub rows_affected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_builder_keeps_order() {
        let tx = Transaction::new()
            .then(StoreOp::InsertFavorite {
                user_id: 1,
                video_id: 2,
            })
            .adjust(Column::VideoFavoriteCount, 2, 1);
        assert_eq!(tx.ops().len(), 2);
        assert!(matches!(
            tx.ops().first(),
            Some(StoreOp::InsertFavorite { .. })
        ));
        assert!(matches!(
            tx.ops().last(),
            Some(StoreOp::Adjust { delta: 1, .. })
        ));
    }

    #[test]
    fn test_column_names() {
        assert_eq!(Column::UserFollowerCount.name(), "follower_count");
        assert_eq!(Column::VideoCommentCount.name(), "comment_count");
    }
}
