//! Backend Traits
//!
//! The two external collaborators of the cache layer, as trait seams:
//!
//! - `CacheStore`: the key-value / set / sorted-set cache (Redis in production)
//! - `RecordStore`: the relational store of record
//!
//! Both are shared behind `Arc<dyn ...>` by every component and must be safe
//! for concurrent use.
//!
//! # Example: Custom Cache Store
//!
//! ```rust,ignore
//! use video_cache::{CacheStore, async_trait};
//! use std::time::Duration;
//! use anyhow::Result;
//!
//! struct MyCacheStore {
//!     // Your implementation
//! }
//!
//! #[async_trait]
//! impl CacheStore for MyCacheStore {
//!     async fn exists(&self, key: &str) -> Result<bool> {
//!         // Your implementation
//!     }
//!
//!     // ... implement other methods
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreError;
use crate::model::{Comment, NewVideo, User, Video};
use crate::store::{Transaction, TxReport};

/// Cache-store contract consumed by the cache layer
///
/// Semantics follow Redis:
///
/// - keys hold exactly one of hash, set or sorted set; using a key with a
///   command of another type is an error
/// - removing the last member of a set removes the key
/// - `set_expire` on a missing key is a no-op
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to support concurrent access across async tasks.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Whether `key` currently exists (and has not expired)
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// `HSET key field value`
    async fn set_hash_field(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// `HGET key field`; `None` when the key or field is absent
    async fn get_hash_field(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Reset the time-to-live of `key`
    async fn set_expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// `SADD key member`
    async fn add_member(&self, key: &str, member: &str) -> Result<()>;

    /// `SREM key member`
    async fn remove_member(&self, key: &str, member: &str) -> Result<()>;

    /// `SISMEMBER key member`
    async fn is_member(&self, key: &str, member: &str) -> Result<bool>;

    /// `SMEMBERS key`; empty when the key is absent
    async fn list_members(&self, key: &str) -> Result<Vec<String>>;

    /// `ZADD key score member`
    async fn add_scored(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// `ZSCORE key member`; `None` when the key or member is absent
    async fn score(&self, key: &str, member: &str) -> Result<Option<f64>>;

    /// Members with score `<= max_score`, highest score first, at most `limit`
    async fn range_by_score_desc(
        &self,
        key: &str,
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// Check if the cache store is reachable and answering
    async fn health_check(&self) -> bool;

    /// Get the name of this cache store
    ///
    /// This is used for logging and debugging purposes.
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Store-of-record contract consumed by the cache layer
///
/// Read methods return `Ok(None)` / empty lists for absent rows. Errors are
/// opaque and propagate through the cache layer unchanged.
///
/// Every mutation that touches a denormalized counter goes through
/// [`run_transaction`](Self::run_transaction), which applies all operations
/// atomically or none of them.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_user(&self, id: i64) -> Result<Option<User>>;

    async fn get_video(&self, id: i64) -> Result<Option<Video>>;

    async fn get_comment(&self, id: i64) -> Result<Option<Comment>>;

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>>;

    /// Ids of users that `user_id` follows
    async fn list_following(&self, user_id: i64) -> Result<Vec<i64>>;

    /// Ids of users following `user_id`
    async fn list_followers(&self, user_id: i64) -> Result<Vec<i64>>;

    /// Ids of videos liked by `user_id`
    async fn list_favorites(&self, user_id: i64) -> Result<Vec<i64>>;

    /// Ids of comments on `video_id`
    async fn list_comment_ids(&self, video_id: i64) -> Result<Vec<i64>>;

    /// Ids of videos published by `user_id`
    async fn list_published(&self, user_id: i64) -> Result<Vec<i64>>;

    /// Videos with `create_time <= latest_time`, newest first, at most `limit`
    async fn list_feed(&self, latest_time: i64, limit: usize) -> Result<Vec<Video>>;

    /// Insert a user; the store assigns the id
    async fn create_user(&self, name: &str, password_hash: &str) -> Result<User>;

    /// Insert a video; the store assigns the id
    async fn create_video(&self, video: NewVideo) -> Result<Video>;

    /// Apply every operation of `tx` atomically
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] and commits nothing if any operation fails.
    async fn run_transaction(&self, tx: Transaction) -> std::result::Result<TxReport, StoreError>;
}
