//! Redis Cache - Production Cache Store
//!
//! Redis-backed implementation of [`CacheStore`], shared by every service instance.

use anyhow::{Context, Result};
use redis::Client;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Redis cache store with `ConnectionManager` for automatic reconnection
///
/// Every [`CacheStore`] method maps onto exactly one Redis command:
///
/// | method | command |
/// |---|---|
/// | `exists` | `EXISTS` |
/// | `delete` | `DEL` |
/// | `set_hash_field` / `get_hash_field` | `HSET` / `HGET` |
/// | `set_expire` | `PEXPIRE` |
/// | `add_member` / `remove_member` / `is_member` / `list_members` | `SADD` / `SREM` / `SISMEMBER` / `SMEMBERS` |
/// | `add_scored` / `range_by_score_desc` | `ZADD` / `ZREVRANGEBYSCORE ... LIMIT` |
pub struct RedisCache {
    /// Redis connection manager - handles reconnection automatically
    conn_manager: ConnectionManager,
    /// Command counter
    commands: Arc<AtomicU64>,
    /// Failed command counter
    errors: Arc<AtomicU64>,
}

impl RedisCache {
    /// Create new Redis cache using `REDIS_URL` (default `redis://127.0.0.1:6379`)
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub async fn new() -> Result<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        Self::with_url(&redis_url).await
    }

    /// Create new Redis cache with custom URL
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection string (e.g., `<redis://localhost:6379>`)
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub async fn with_url(redis_url: &str) -> Result<Self> {
        info!(redis_url = %redis_url, "Initializing Redis Cache with ConnectionManager");

        let client = Client::open(redis_url)
            .with_context(|| format!("Failed to create Redis client with URL: {redis_url}"))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .context("Failed to establish Redis connection manager")?;

        // Test connection
        let mut conn = conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING health check failed")?;

        info!(redis_url = %redis_url, "Redis Cache connected successfully (ConnectionManager enabled)");

        Ok(Self {
            conn_manager,
            commands: Arc::new(AtomicU64::new(0)),
            errors: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Run one command, counting it and its failure
    async fn run<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd, what: &str) -> Result<T> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        let mut conn = self.conn_manager.clone();
        match cmd.query_async::<T>(&mut conn).await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(anyhow::Error::new(e).context(format!("[Redis] {what} failed")))
            }
        }
    }

    /// Commands issued so far
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    /// Commands that returned an error
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Scan keys matching a pattern (glob-style: *, ?, [])
    ///
    /// Uses Redis SCAN command (non-blocking, cursor-based iteration)
    /// This is safe for production use, unlike KEYS command.
    ///
    /// # Examples
    /// ```no_run
    /// # use video_cache::backends::RedisCache;
    /// # async fn example() -> anyhow::Result<()> {
    /// # let cache = RedisCache::new().await?;
    /// // Every cached user hash
    /// let keys = cache.scan_keys("user:*").await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis command fails.
    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100);
            let (next, batch): (u64, Vec<String>) = self.run(&cmd, "SCAN").await?;

            cursor = next;
            keys.extend(batch);

            // Cursor 0 means iteration is complete
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %pattern, count = keys.len(), "[Redis] Scanned keys matching pattern");
        Ok(keys)
    }

    /// Remove multiple keys at once (bulk delete)
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis command fails.
    pub async fn remove_bulk(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut cmd = redis::cmd("DEL");
        cmd.arg(keys);
        let count: usize = self.run(&cmd, "DEL").await?;
        debug!(count = count, "[Redis] Removed keys in bulk");
        Ok(count)
    }

    /// Delete every key matching `pattern`
    ///
    /// Used by tooling to drop a whole key space, e.g. `KeySpace::pattern()`.
    ///
    /// # Errors
    ///
    /// Returns an error if a SCAN or DEL command fails.
    pub async fn flush_pattern(&self, pattern: &str) -> Result<usize> {
        let keys = self.scan_keys(pattern).await?;
        let mut removed = 0;
        for chunk in keys.chunks(500) {
            removed += self.remove_bulk(chunk).await?;
        }
        info!(pattern = %pattern, removed, "[Redis] Flushed key space");
        Ok(removed)
    }
}

// ===== Trait Implementations =====

use crate::traits::CacheStore;
use async_trait::async_trait;

/// Implement `CacheStore` trait for `RedisCache`
#[async_trait]
impl CacheStore for RedisCache {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        let count: u64 = self.run(&cmd, "EXISTS").await?;
        Ok(count > 0)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let _: u64 = self.run(&cmd, "DEL").await?;
        Ok(())
    }

    async fn set_hash_field(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key).arg(field).arg(value);
        let _: u64 = self.run(&cmd, "HSET").await?;
        Ok(())
    }

    async fn get_hash_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut cmd = redis::cmd("HGET");
        cmd.arg(key).arg(field);
        self.run(&cmd, "HGET").await
    }

    async fn set_expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(key).arg(millis);
        let _: u64 = self.run(&cmd, "PEXPIRE").await?;
        debug!(key = %key, ttl_secs = %ttl.as_secs(), "[Redis] Refreshed TTL");
        Ok(())
    }

    async fn add_member(&self, key: &str, member: &str) -> Result<()> {
        let mut cmd = redis::cmd("SADD");
        cmd.arg(key).arg(member);
        let _: u64 = self.run(&cmd, "SADD").await?;
        Ok(())
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<()> {
        let mut cmd = redis::cmd("SREM");
        cmd.arg(key).arg(member);
        let _: u64 = self.run(&cmd, "SREM").await?;
        Ok(())
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        let mut cmd = redis::cmd("SISMEMBER");
        cmd.arg(key).arg(member);
        self.run(&cmd, "SISMEMBER").await
    }

    async fn list_members(&self, key: &str) -> Result<Vec<String>> {
        let mut cmd = redis::cmd("SMEMBERS");
        cmd.arg(key);
        self.run(&cmd, "SMEMBERS").await
    }

    async fn add_scored(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(key).arg(score).arg(member);
        let _: u64 = self.run(&cmd, "ZADD").await?;
        Ok(())
    }

    async fn score(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let mut cmd = redis::cmd("ZSCORE");
        cmd.arg(key).arg(member);
        self.run(&cmd, "ZSCORE").await
    }

    async fn range_by_score_desc(
        &self,
        key: &str,
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut cmd = redis::cmd("ZREVRANGEBYSCORE");
        cmd.arg(key)
            .arg(max_score)
            .arg("-inf")
            .arg("LIMIT")
            .arg(0)
            .arg(limit);
        self.run(&cmd, "ZREVRANGEBYSCORE").await
    }

    async fn health_check(&self) -> bool {
        let mut cmd = redis::cmd("PING");
        cmd.arg("video-cache");
        matches!(
            self.run::<String>(&cmd, "PING").await,
            Ok(ref reply) if reply == "video-cache"
        )
    }

    fn name(&self) -> &'static str {
        "Redis"
    }
}
