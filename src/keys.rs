//! Key-space codec
//!
//! Pure functions from an entity kind and id to a cache key:
//!
//! ```text
//! user:{id}            video:{id}            comment:{id}        entity hashes
//! follow:{owner}       follower:{owner}      favorite:{owner}    owner-keyed sets
//! comment_list:{video} publish_list:{user}                       owner-keyed sets
//! feed                                                           global timeline
//! ```
//!
//! Every tag is distinct and ends at the first `:`, so two kinds can never
//! produce the same key. An optional prefix namespaces the whole key space.

use std::fmt;

/// Entity hashes held in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Video,
    Comment,
}

impl EntityKind {
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Video => "video",
            Self::Comment => "comment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Owner-keyed id sets held in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Users the owner follows
    Follow,
    /// Users following the owner
    Follower,
    /// Videos the owner liked
    Favorite,
    /// Comments on the owning video
    CommentIds,
    /// Videos the owner published
    PublishIds,
}

impl CollectionKind {
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Follower => "follower",
            Self::Favorite => "favorite",
            Self::CommentIds => "comment_list",
            Self::PublishIds => "publish_list",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

const TIMELINE_TAG: &str = "feed";

/// Builds every cache key the layer touches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Create a key space. An empty prefix yields bare keys (`user:1`).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key of an entity hash
    #[must_use]
    pub fn entity(&self, kind: EntityKind, id: i64) -> String {
        self.build(kind.tag(), Some(id))
    }

    /// Key of an owner-keyed set
    #[must_use]
    pub fn collection(&self, kind: CollectionKind, owner: i64) -> String {
        self.build(kind.tag(), Some(owner))
    }

    /// The single global timeline key
    #[must_use]
    pub fn timeline(&self) -> String {
        self.build(TIMELINE_TAG, None)
    }

    /// Glob matching every key in this key space
    #[must_use]
    pub fn pattern(&self) -> String {
        if self.prefix.is_empty() {
            "*".to_string()
        } else {
            format!("{}:*", self.prefix)
        }
    }

    fn build(&self, tag: &str, id: Option<i64>) -> String {
        match (self.prefix.is_empty(), id) {
            (true, Some(id)) => format!("{tag}:{id}"),
            (true, None) => tag.to_string(),
            (false, Some(id)) => format!("{}:{tag}:{id}", self.prefix),
            (false, None) => format!("{}:{tag}", self.prefix),
        }
    }
}
