//! Struct-to-hash marshaling
//!
//! Each cached record declares an explicit field table with [`hash_record!`]:
//! the cached fields (name and type) and the fields that must never reach the
//! cache (secrets, transient flags). The cache field name is the Rust field
//! identifier, which is already snake_case.
//!
//! [`write_hash`] issues one `HSET` per field and [`read_hash`] one `HGET` per
//! field. A write that fails part-way deletes the key before returning the
//! error, so a half-written hash is never mistaken for a populated one. If
//! that delete fails too, the next [`read_hash`] reports the missing field as
//! [`CacheError::MalformedCacheEntry`], which readers treat as a miss.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{CacheError, CacheResult};
use crate::keys::EntityKind;
use crate::traits::CacheStore;

/// One row of a record's field table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name inside the cache hash
    pub name: &'static str,
    /// Declared Rust type, for diagnostics
    pub type_name: &'static str,
}

/// A field that is missing or fails to parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

/// Scalar values that can live in a hash field
pub trait HashValue: Sized {
    fn encode(&self) -> String;

    /// # Errors
    ///
    /// Returns a description of the parse failure.
    fn decode(raw: &str) -> Result<Self, String>;
}

impl HashValue for i64 {
    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(raw: &str) -> Result<Self, String> {
        raw.parse::<i64>().map_err(|e| e.to_string())
    }
}

impl HashValue for String {
    fn encode(&self) -> String {
        self.clone()
    }

    fn decode(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

/// A record with a compile-time field table
pub trait HashRecord: Sized {
    /// Entity kind, used for key construction and `NotFound` errors
    const KIND: EntityKind;
    /// Fields written to and read from the hash, in order
    const FIELDS: &'static [FieldSpec];
    /// Record fields that are never cached
    const SKIPPED: &'static [&'static str];

    fn id(&self) -> i64;

    /// Project cached fields into `(field, value)` pairs
    fn to_fields(&self) -> Vec<(&'static str, String)>;

    /// Rebuild a record from cached fields; skipped fields take their default
    ///
    /// # Errors
    ///
    /// Returns the first missing or unparsable field.
    fn from_fields(fields: &HashMap<&'static str, String>) -> Result<Self, FieldError>;

    /// The record exactly as the cache would hand it back
    #[must_use]
    fn projected(&self) -> Self;
}

#[doc(hidden)]
pub fn decode_field<T: HashValue>(
    fields: &HashMap<&'static str, String>,
    field: &'static str,
) -> Result<T, FieldError> {
    let raw = fields.get(field).ok_or_else(|| FieldError {
        field,
        reason: "field missing".to_string(),
    })?;
    T::decode(raw).map_err(|reason| FieldError { field, reason })
}

/// Declare the hash field table of a record.
///
/// Every struct field must be listed under either `cached` or `skipped`, so a
/// new field cannot be added without deciding whether it is cached.
macro_rules! hash_record {
    (
        $record:ident,
        kind = $kind:expr,
        id = $id:ident,
        cached { $($field:ident : $fty:ty),+ $(,)? }
        skipped { $($skip:ident),* $(,)? }
    ) => {
        impl $crate::hash::HashRecord for $record {
            const KIND: $crate::keys::EntityKind = $kind;
            const FIELDS: &'static [$crate::hash::FieldSpec] = &[
                $($crate::hash::FieldSpec {
                    name: stringify!($field),
                    type_name: stringify!($fty),
                }),+
            ];
            const SKIPPED: &'static [&'static str] = &[$(stringify!($skip)),*];

            fn id(&self) -> i64 {
                self.$id
            }

            fn to_fields(&self) -> Vec<(&'static str, String)> {
                vec![$(
                    (stringify!($field), <$fty as $crate::hash::HashValue>::encode(&self.$field))
                ),+]
            }

            fn from_fields(
                fields: &std::collections::HashMap<&'static str, String>,
            ) -> Result<Self, $crate::hash::FieldError> {
                Ok(Self {
                    $($field: $crate::hash::decode_field::<$fty>(fields, stringify!($field))?,)+
                    $($skip: Default::default(),)*
                })
            }

            fn projected(&self) -> Self {
                Self {
                    $($field: self.$field.clone(),)+
                    $($skip: Default::default(),)*
                }
            }
        }
    };
}

pub(crate) use hash_record;

/// Write every cached field of `record` into the hash at `key`.
///
/// Does not set a TTL; callers follow up with `set_expire`.
///
/// # Errors
///
/// Returns [`CacheError::CacheUnavailable`] if any `HSET` fails. The key is
/// deleted (best effort) before returning.
pub async fn write_hash<T: HashRecord>(
    cache: &dyn CacheStore,
    key: &str,
    record: &T,
) -> CacheResult<()> {
    for (field, value) in record.to_fields() {
        if let Err(e) = cache.set_hash_field(key, field, &value).await {
            discard_partial(cache, key).await;
            return Err(CacheError::unavailable(
                e.context(format!("HSET {key} {field} failed")),
            ));
        }
    }
    Ok(())
}

/// Read the hash at `key` back into a typed record.
///
/// # Errors
///
/// - [`CacheError::CacheUnavailable`] if an `HGET` fails
/// - [`CacheError::MalformedCacheEntry`] if a field is missing or unparsable
pub async fn read_hash<T: HashRecord>(cache: &dyn CacheStore, key: &str) -> CacheResult<T> {
    let mut fields = HashMap::with_capacity(T::FIELDS.len());
    for field in T::FIELDS {
        let raw = cache
            .get_hash_field(key, field.name)
            .await
            .map_err(CacheError::unavailable)?
            .ok_or_else(|| CacheError::malformed(key, field.name, "field missing"))?;
        fields.insert(field.name, raw);
    }
    T::from_fields(&fields).map_err(|e| CacheError::malformed(key, e.field, e.reason))
}

/// Delete a key whose write did not complete
pub(crate) async fn discard_partial(cache: &dyn CacheStore, key: &str) {
    if let Err(e) = cache.delete(key).await {
        warn!(key = %key, error = %e, "Failed to discard partially written cache entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DashMapCache;
    use crate::model::{Comment, User, Video};

    fn sample_user() -> User {
        User {
            id: 3,
            name: "carol".to_string(),
            password: "$2b$10$secret".to_string(),
            follow_count: 4,
            follower_count: 5,
        }
    }

    #[test]
    fn test_field_tables() {
        let names: Vec<_> = User::FIELDS.iter().map(|f| f.name).collect();
        assert_eq!(names, ["id", "name", "follow_count", "follower_count"]);
        assert_eq!(User::SKIPPED, ["password"]);

        let names: Vec<_> = Video::FIELDS.iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            [
                "id",
                "user_id",
                "play_url",
                "cover_url",
                "favorite_count",
                "comment_count",
                "title",
                "create_time"
            ]
        );
        assert!(Comment::FIELDS.iter().any(|f| f.name == "create_date"));
    }

    #[test]
    fn test_projection_drops_skipped_fields() {
        let user = sample_user();
        let projected = user.projected();
        assert!(projected.password.is_empty());
        assert_eq!(projected.name, "carol");
        assert!(user.to_fields().iter().all(|(f, _)| *f != "password"));
    }

    #[test]
    fn test_from_fields_reports_bad_field() {
        let mut fields: HashMap<&'static str, String> =
            sample_user().to_fields().into_iter().collect();
        fields.insert("follow_count", "many".to_string());
        let err = User::from_fields(&fields).unwrap_err();
        assert_eq!(err.field, "follow_count");

        fields.remove("name");
        let err = User::from_fields(&fields).unwrap_err();
        assert_eq!(err.field, "name");
        assert_eq!(err.reason, "field missing");
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let cache = DashMapCache::new();
        let user = sample_user();
        write_hash(&cache, "user:3", &user).await.unwrap();

        let back: User = read_hash(&cache, "user:3").await.unwrap();
        assert_eq!(back, user.projected());
        assert_eq!(
            cache.get_hash_field("user:3", "password").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_one_command_per_field() {
        let cache = DashMapCache::new();
        let before = cache.ops();
        write_hash(&cache, "user:3", &sample_user()).await.unwrap();
        assert_eq!(cache.ops() - before, User::FIELDS.len() as u64);

        let before = cache.ops();
        let _: User = read_hash(&cache, "user:3").await.unwrap();
        assert_eq!(cache.ops() - before, User::FIELDS.len() as u64);
    }

    #[tokio::test]
    async fn test_missing_field_is_malformed() {
        let cache = DashMapCache::new();
        cache.set_hash_field("user:9", "id", "9").await.unwrap();
        let err = read_hash::<User>(&cache, "user:9").await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::MalformedCacheEntry { ref field, .. } if field == "name"
        ));
    }

    #[tokio::test]
    async fn test_failed_write_discards_key() {
        let cache = DashMapCache::new();
        // A set under the same key makes every HSET fail with a type error
        cache.add_member("user:3", "x").await.unwrap();
        let err = write_hash(&cache, "user:3", &sample_user()).await.unwrap_err();
        assert!(matches!(err, CacheError::CacheUnavailable(_)));
        assert!(!cache.exists("user:3").await.unwrap());
    }
}
