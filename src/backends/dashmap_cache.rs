//! `DashMap` Cache - In-Process Cache Store
//!
//! A concurrent `HashMap` that mimics the subset of Redis the cache layer uses:
//! hashes, sets and sorted sets with per-key TTL.

use anyhow::Result;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Value held under one key
#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    Sorted(HashMap<String, f64>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Hash(_) => "hash",
            Self::Set(_) => "set",
            Self::Sorted(_) => "zset",
        }
    }
}

/// Cache entry with expiration tracking
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }
}

fn wrong_type(key: &str, found: &Value, wanted: &str) -> anyhow::Error {
    anyhow::anyhow!(
        "WRONGTYPE Operation against key '{key}' holding a {}, expected {wanted}",
        found.type_name()
    )
}

/// In-process cache store using `DashMap`
///
/// **Use Case**: tests, demos and single-process deployments
///
/// **Features**:
/// - Lock-free concurrent reads/writes
/// - Redis-compatible semantics for the commands the cache layer issues
///   (empty sets disappear, commands against a key of another type fail)
/// - TTL tracked on tokio's clock, so paused-time tests can expire entries
///
/// **Limitations**:
/// - No eviction beyond TTL expiry
/// - Expired entries are dropped lazily on access or by [`cleanup_expired`](Self::cleanup_expired)
///
/// **Example**:
/// ```rust
/// use video_cache::backends::DashMapCache;
/// use video_cache::traits::CacheStore;
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let cache = DashMapCache::new();
/// cache.set_hash_field("user:1", "name", "alice").await?;
/// cache.set_expire("user:1", Duration::from_secs(60)).await?;
/// assert_eq!(cache.get_hash_field("user:1", "name").await?, Some("alice".to_string()));
/// # Ok(())
/// # }
/// ```
pub struct DashMapCache {
    /// Concurrent `HashMap`
    map: Arc<DashMap<String, CacheEntry>>,
    /// Commands served
    ops: Arc<AtomicU64>,
}

impl DashMapCache {
    /// Create new `DashMap` cache
    #[must_use]
    pub fn new() -> Self {
        info!("Initializing DashMap Cache (concurrent HashMap)");

        Self {
            map: Arc::new(DashMap::new()),
            ops: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cleanup expired entries (may be called periodically)
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        self.map.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(count = removed, "[DashMap] Cleaned up expired entries");
        }
        removed
    }

    /// Remaining TTL of `key`, `None` if absent or persistent
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.purge_if_expired(key);
        self.map
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Number of commands served so far
    pub fn ops(&self) -> u64 {
        self.ops.load(Ordering::Relaxed)
    }

    /// Get current number of keys (expired keys included until purged)
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Count the command and drop `key` if it has expired
    fn touch(&self, key: &str) {
        self.ops.fetch_add(1, Ordering::Relaxed);
        self.purge_if_expired(key);
    }

    fn purge_if_expired(&self, key: &str) {
        self.map.remove_if(key, |_, entry| entry.is_expired());
    }
}

impl Default for DashMapCache {
    fn default() -> Self {
        Self::new()
    }
}

// ===== Trait Implementations =====

use crate::traits::CacheStore;
use async_trait::async_trait;

/// Implement `CacheStore` trait for `DashMapCache`
#[async_trait]
impl CacheStore for DashMapCache {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.touch(key);
        Ok(self.map.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.touch(key);
        self.map.remove(key);
        Ok(())
    }

    async fn set_hash_field(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.touch(key);
        let mut entry = self
            .map
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(Value::Hash(HashMap::new())));
        match &mut entry.value {
            Value::Hash(hash) => {
                hash.insert(field.to_string(), value.to_string());
                Ok(())
            }
            other => Err(wrong_type(key, other, "hash")),
        }
    }

    async fn get_hash_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.touch(key);
        match self.map.get(key) {
            Some(entry) => match &entry.value {
                Value::Hash(hash) => Ok(hash.get(field).cloned()),
                other => Err(wrong_type(key, other, "hash")),
            },
            None => Ok(None),
        }
    }

    async fn set_expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.touch(key);
        if let Some(mut entry) = self.map.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn add_member(&self, key: &str, member: &str) -> Result<()> {
        self.touch(key);
        let mut entry = self
            .map
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(Value::Set(HashSet::new())));
        match &mut entry.value {
            Value::Set(set) => {
                set.insert(member.to_string());
                Ok(())
            }
            other => Err(wrong_type(key, other, "set")),
        }
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<()> {
        self.touch(key);
        let now_empty = match self.map.get_mut(key) {
            Some(mut entry) => match &mut entry.value {
                Value::Set(set) => {
                    set.remove(member);
                    set.is_empty()
                }
                other => return Err(wrong_type(key, other, "set")),
            },
            None => return Ok(()),
        };
        if now_empty {
            self.map
                .remove_if(key, |_, entry| matches!(&entry.value, Value::Set(s) if s.is_empty()));
        }
        Ok(())
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        self.touch(key);
        match self.map.get(key) {
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.contains(member)),
                other => Err(wrong_type(key, other, "set")),
            },
            None => Ok(false),
        }
    }

    async fn list_members(&self, key: &str) -> Result<Vec<String>> {
        self.touch(key);
        match self.map.get(key) {
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.iter().cloned().collect()),
                other => Err(wrong_type(key, other, "set")),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn add_scored(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.touch(key);
        let mut entry = self
            .map
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(Value::Sorted(HashMap::new())));
        match &mut entry.value {
            Value::Sorted(scores) => {
                scores.insert(member.to_string(), score);
                Ok(())
            }
            other => Err(wrong_type(key, other, "zset")),
        }
    }

    async fn score(&self, key: &str, member: &str) -> Result<Option<f64>> {
        self.touch(key);
        match self.map.get(key) {
            Some(entry) => match &entry.value {
                Value::Sorted(scores) => Ok(scores.get(member).copied()),
                other => Err(wrong_type(key, other, "zset")),
            },
            None => Ok(None),
        }
    }

    async fn range_by_score_desc(
        &self,
        key: &str,
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<String>> {
        self.touch(key);
        let Some(entry) = self.map.get(key) else {
            return Ok(Vec::new());
        };
        let Value::Sorted(scores) = &entry.value else {
            return Err(wrong_type(key, &entry.value, "zset"));
        };
        let mut hits: Vec<(&String, f64)> = scores
            .iter()
            .filter(|(_, score)| **score <= max_score)
            .map(|(member, score)| (member, *score))
            .collect();
        // Redis breaks score ties by reverse lexicographic order in ZREVRANGEBYSCORE
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(a.0)));
        Ok(hits
            .into_iter()
            .take(limit)
            .map(|(member, _)| member.clone())
            .collect())
    }

    async fn health_check(&self) -> bool {
        let test_key = "health_check_dashmap";

        match self.set_hash_field(test_key, "ok", "1").await {
            Ok(()) => {
                let ok = matches!(
                    self.get_hash_field(test_key, "ok").await,
                    Ok(Some(ref v)) if v == "1"
                );
                let _ = self.delete(test_key).await;
                ok
            }
            Err(_) => false,
        }
    }

    fn name(&self) -> &'static str {
        "DashMap"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_set_disappears() {
        let cache = DashMapCache::new();
        cache.add_member("s", "a").await.unwrap();
        assert!(cache.exists("s").await.unwrap());
        cache.remove_member("s", "a").await.unwrap();
        assert!(!cache.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_is_error() {
        let cache = DashMapCache::new();
        cache.set_hash_field("k", "f", "v").await.unwrap();
        assert!(cache.add_member("k", "m").await.is_err());
        assert!(cache.is_member("k", "m").await.is_err());
        assert!(cache.add_scored("k", "m", 1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_range_by_score_desc() {
        let cache = DashMapCache::new();
        for (member, score) in [("1", 100.0), ("2", 300.0), ("3", 200.0), ("4", 400.0)] {
            cache.add_scored("feed", member, score).await.unwrap();
        }
        let ids = cache.range_by_score_desc("feed", 300.0, 10).await.unwrap();
        assert_eq!(ids, vec!["2", "3", "1"]);
        let ids = cache.range_by_score_desc("feed", 300.0, 2).await.unwrap();
        assert_eq!(ids, vec!["2", "3"]);
        assert!(cache.range_by_score_desc("missing", 1.0, 5).await.unwrap().is_empty());

        assert_eq!(cache.score("feed", "3").await.unwrap(), Some(200.0));
        assert_eq!(cache.score("feed", "9").await.unwrap(), None);
        assert_eq!(cache.score("missing", "1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = DashMapCache::new();
        cache.set_hash_field("k", "f", "v").await.unwrap();
        cache.set_expire("k", Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.ttl("k"), Some(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(!cache.exists("k").await.unwrap());
        assert_eq!(cache.get_hash_field("k", "f").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired() {
        let cache = DashMapCache::new();
        cache.add_member("a", "1").await.unwrap();
        cache.add_member("b", "1").await.unwrap();
        cache.set_expire("a", Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_expire_missing_key_is_noop() {
        let cache = DashMapCache::new();
        cache.set_expire("nope", Duration::from_secs(1)).await.unwrap();
        assert!(!cache.exists("nope").await.unwrap());
        assert!(cache.health_check().await);
    }
}
