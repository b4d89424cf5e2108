//! Records of the store of record and the hydrated views built from them

use serde::{Deserialize, Serialize};

use crate::hash::hash_record;
use crate::keys::EntityKind;

/// A registered user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    /// Credential hash. Never cached, never serialized.
    #[serde(skip)]
    pub password: String,
    pub follow_count: i64,
    pub follower_count: i64,
}

hash_record!(
    User,
    kind = EntityKind::User,
    id = id,
    cached {
        id: i64,
        name: String,
        follow_count: i64,
        follower_count: i64,
    }
    skipped { password }
);

/// A published video
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub id: i64,
    /// Author id
    pub user_id: i64,
    pub play_url: String,
    pub cover_url: String,
    pub favorite_count: i64,
    pub comment_count: i64,
    pub title: String,
    /// Unix seconds; the timeline score
    pub create_time: i64,
}

hash_record!(
    Video,
    kind = EntityKind::Video,
    id = id,
    cached {
        id: i64,
        user_id: i64,
        play_url: String,
        cover_url: String,
        favorite_count: i64,
        comment_count: i64,
        title: String,
        create_time: i64,
    }
    skipped {}
);

/// A comment on a video
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub user_id: i64,
    pub video_id: i64,
    pub content: String,
    /// `MM-DD HH:MM:SS`, local time of creation
    pub create_date: String,
}

hash_record!(
    Comment,
    kind = EntityKind::Comment,
    id = id,
    cached {
        id: i64,
        user_id: i64,
        video_id: i64,
        content: String,
        create_date: String,
    }
    skipped {}
);

/// Insert payload for a video; the store assigns the id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVideo {
    pub user_id: i64,
    pub play_url: String,
    pub cover_url: String,
    pub title: String,
    pub create_time: i64,
}

/// Insert payload for a comment; the store assigns the id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub user_id: i64,
    pub video_id: i64,
    pub content: String,
    pub create_date: String,
}

impl NewComment {
    /// Comment stamped with the current local time
    pub fn now(user_id: i64, video_id: i64, content: impl Into<String>) -> Self {
        Self {
            user_id,
            video_id,
            content: content.into(),
            create_date: chrono::Local::now().format("%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// A user as seen by a particular viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    pub is_follow: bool,
}

/// A video with its author and the viewer's like state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoView {
    #[serde(flatten)]
    pub video: Video,
    pub author: UserView,
    pub is_favorite: bool,
}

/// A comment with its author
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentView {
    pub id: i64,
    pub user: UserView,
    pub content: String,
    pub create_date: String,
}

/// Viewer id used for anonymous requests
pub const ANONYMOUS: i64 = 0;

/// Current Unix time in seconds
#[must_use]
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
