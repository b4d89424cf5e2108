//! Error types for the cache layer and the store-of-record contract

use thiserror::Error;

use crate::keys::EntityKind;

/// Failures surfaced by entity caches, collection caches, the feed timeline
/// and the invalidation coordinator.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The store of record has no row for this id. Permanent, never retried.
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    /// A cache command failed (connection refused, timeout, WRONGTYPE...).
    #[error("cache unavailable: {0}")]
    CacheUnavailable(#[source] anyhow::Error),

    /// A hash entry is missing a field or holds an unparsable value.
    #[error("malformed cache entry '{key}' (field '{field}'): {reason}")]
    MalformedCacheEntry {
        key: String,
        field: String,
        reason: String,
    },

    /// The store-of-record transaction aborted; nothing was committed.
    #[error("store mutation failed: {0}")]
    StoreMutationFailed(#[from] StoreError),

    /// A read against the store of record failed. Propagated unchanged.
    #[error("store of record error: {0}")]
    Store(#[source] anyhow::Error),
}

impl CacheError {
    pub(crate) fn unavailable(err: anyhow::Error) -> Self {
        Self::CacheUnavailable(err)
    }

    pub(crate) fn malformed(key: &str, field: &str, reason: impl Into<String>) -> Self {
        Self::MalformedCacheEntry {
            key: key.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether a read should fall back to repopulation instead of failing
    #[must_use]
    pub fn is_treated_as_miss(&self) -> bool {
        matches!(
            self,
            Self::MalformedCacheEntry { .. } | Self::CacheUnavailable(_)
        )
    }
}

/// Aborts reported by [`RecordStore::run_transaction`](crate::traits::RecordStore::run_transaction).
///
/// Any of these means the whole transaction was rolled back.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The edge (favorite or relation) already exists
    #[error("edge already exists")]
    EdgeExists,

    /// The edge to delete does not exist
    #[error("edge does not exist")]
    EdgeMissing,

    /// A row referenced by the transaction does not exist
    #[error("{kind} {id} does not exist")]
    RecordMissing { kind: EntityKind, id: i64 },

    /// The caller does not own the row it tried to delete
    #[error("row is owned by another user")]
    NotOwner,

    /// A counter adjustment would drive the column below zero
    #[error("counter underflow on {column} for id {id}")]
    CounterUnderflow { column: &'static str, id: i64 },

    /// Opaque backend failure (connection, constraint, deadlock...)
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// Whether the store rejected the request on business grounds, as opposed
    /// to failing or finding its counters inconsistent
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::EdgeExists | Self::EdgeMissing | Self::RecordMissing { .. } | Self::NotOwner
        )
    }
}

/// Result alias used throughout the cache layer
pub type CacheResult<T> = std::result::Result<T, CacheError>;
