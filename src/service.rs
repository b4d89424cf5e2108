//! Social Service - transport-agnostic endpoint handlers
//!
//! Each method is one endpoint of the social-video backend, expressed over the
//! cache layer: reads go through the entity/collection caches and the
//! assembler, writes through the invalidation coordinator. Business
//! rejections come back as distinct [`ServiceError`] variants; everything
//! else is [`ServiceError::Infrastructure`], whose detail is kept out of
//! [`ServiceError::public_message`].

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::VideoCacheSystem;
use crate::error::{CacheError, StoreError};
use crate::hash::HashRecord;
use crate::invalidation::Mutation;
use crate::model::{CommentView, NewComment, NewVideo, User, UserView, Video, VideoView, unix_now};

/// Endpoint failures as seen by clients
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("already exists")]
    AlreadyExists,

    #[error("not found")]
    NotFound,

    #[error("not authorized")]
    NotAuthorized,

    #[error("invalid action")]
    InvalidAction,

    #[error("infrastructure error: {0}")]
    Infrastructure(#[source] CacheError),
}

impl ServiceError {
    /// Text safe to return to clients
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::AlreadyExists => "already exists",
            Self::NotFound => "not found",
            Self::NotAuthorized => "not authorized",
            Self::InvalidAction => "invalid action",
            Self::Infrastructure(_) => "internal error, please retry later",
        }
    }

    #[must_use]
    pub fn is_business(&self) -> bool {
        !matches!(self, Self::Infrastructure(_))
    }
}

impl From<CacheError> for ServiceError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotFound { .. }
            | CacheError::StoreMutationFailed(
                StoreError::EdgeMissing | StoreError::RecordMissing { .. },
            ) => Self::NotFound,
            CacheError::StoreMutationFailed(StoreError::EdgeExists) => Self::AlreadyExists,
            CacheError::StoreMutationFailed(StoreError::NotOwner) => Self::NotAuthorized,
            other => Self::Infrastructure(other),
        }
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Wire action code: 1 = do, 2 = undo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Do,
    Undo,
}

impl TryFrom<i32> for Action {
    type Error = ServiceError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Do),
            2 => Ok(Self::Undo),
            _ => Err(ServiceError::InvalidAction),
        }
    }
}

/// A parsed comment action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentAction {
    Add { text: String },
    Delete { comment_id: i64 },
}

impl CommentAction {
    /// Build from the wire action code and its optional arguments
    ///
    /// # Errors
    ///
    /// [`ServiceError::InvalidAction`] for an unknown code or a missing argument.
    pub fn parse(code: i32, text: Option<String>, comment_id: Option<i64>) -> ServiceResult<Self> {
        match (Action::try_from(code)?, text, comment_id) {
            (Action::Do, Some(text), _) if !text.is_empty() => Ok(Self::Add { text }),
            (Action::Undo, _, Some(comment_id)) => Ok(Self::Delete { comment_id }),
            _ => Err(ServiceError::InvalidAction),
        }
    }
}

/// One page of the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedPage {
    pub videos: Vec<VideoView>,
    /// Pass back as `latest_time` to continue: the oldest returned creation
    /// time, or the request time when the page is empty
    pub next_time: i64,
}

/// Endpoint handlers over a [`VideoCacheSystem`]
#[derive(Clone)]
pub struct SocialService {
    system: Arc<VideoCacheSystem>,
}

impl SocialService {
    pub fn new(system: VideoCacheSystem) -> Self {
        Self {
            system: Arc::new(system),
        }
    }

    /// Create an account and cache its user hash.
    ///
    /// # Errors
    ///
    /// [`ServiceError::AlreadyExists`] if the name is taken.
    pub async fn register(&self, name: &str, password_hash: &str) -> ServiceResult<User> {
        let store = &self.system.store;
        if store
            .find_user_by_name(name)
            .await
            .map_err(CacheError::Store)?
            .is_some()
        {
            return Err(ServiceError::AlreadyExists);
        }
        let user = store
            .create_user(name, password_hash)
            .await
            .map_err(CacheError::Store)?;
        self.system.users.write_through(&user).await?;
        info!(user_id = user.id, "Registered user");
        Ok(user.projected())
    }

    /// Check credentials and warm the user's hash for the requests that follow.
    ///
    /// Password hashing happens upstream; `password_hash` is compared as is.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] for an unknown name,
    /// [`ServiceError::NotAuthorized`] for a wrong password.
    pub async fn login_cached(&self, name: &str, password_hash: &str) -> ServiceResult<User> {
        let user = self
            .system
            .store
            .find_user_by_name(name)
            .await
            .map_err(CacheError::Store)?
            .ok_or(ServiceError::NotFound)?;
        if user.password != password_hash {
            return Err(ServiceError::NotAuthorized);
        }
        self.system.users.write_through(&user).await?;
        Ok(user.projected())
    }

    /// # Errors
    ///
    /// [`ServiceError::NotFound`] for an unknown user.
    pub async fn user_info(&self, viewer: i64, user_id: i64) -> ServiceResult<UserView> {
        Ok(self.system.assembler.user_view(viewer, user_id).await?)
    }

    /// Videos created at or before `latest_time` (now when `None` or 0),
    /// newest first.
    ///
    /// # Errors
    ///
    /// Infrastructure errors only.
    pub async fn feed(&self, viewer: i64, latest_time: Option<i64>) -> ServiceResult<FeedPage> {
        let now = unix_now();
        let latest = latest_time.filter(|t| *t > 0).unwrap_or(now);
        let timeline = &self.system.timeline;

        let videos = timeline
            .read_videos(latest, timeline.max_feed_size())
            .await?;
        let next_time = videos.last().map_or(now, |v| v.create_time);
        let videos = self.system.assembler.video_views(viewer, videos).await?;
        debug!(viewer, latest, count = videos.len(), "Served feed page");
        Ok(FeedPage { videos, next_time })
    }

    /// Publish a video stamped with the current time
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] if the author does not exist.
    pub async fn publish(
        &self,
        author: i64,
        play_url: &str,
        cover_url: &str,
        title: &str,
    ) -> ServiceResult<Video> {
        self.publish_at(author, play_url, cover_url, title, unix_now())
            .await
    }

    /// [`publish`](Self::publish) with an explicit creation time
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] if the author does not exist.
    pub async fn publish_at(
        &self,
        author: i64,
        play_url: &str,
        cover_url: &str,
        title: &str,
        create_time: i64,
    ) -> ServiceResult<Video> {
        self.system.users.read(author).await?;
        let video = self
            .system
            .invalidation
            .publish(NewVideo {
                user_id: author,
                play_url: play_url.to_string(),
                cover_url: cover_url.to_string(),
                title: title.to_string(),
                create_time,
            })
            .await?;
        Ok(video)
    }

    /// Videos published by `user_id`, newest first
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] for an unknown user.
    pub async fn publish_list(&self, viewer: i64, user_id: i64) -> ServiceResult<Vec<VideoView>> {
        self.system.users.read(user_id).await?;
        let mut ids = self.system.collections.publish_ids.read(user_id).await?;
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(self.system.assembler.videos_by_id(viewer, &ids).await?)
    }

    /// Like or unlike a video
    ///
    /// # Errors
    ///
    /// - [`ServiceError::AlreadyExists`] when liking twice
    /// - [`ServiceError::NotFound`] when unliking a video that is not liked,
    ///   or for an unknown video
    pub async fn favorite_action(
        &self,
        user_id: i64,
        video_id: i64,
        action: Action,
    ) -> ServiceResult<()> {
        self.system.videos.read(video_id).await?;
        let liked = self
            .system
            .collections
            .favorite
            .contains(user_id, video_id)
            .await?;

        let mutation = match (action, liked) {
            (Action::Do, true) => return Err(ServiceError::AlreadyExists),
            (Action::Undo, false) => return Err(ServiceError::NotFound),
            (Action::Do, false) => Mutation::favorite(user_id, video_id),
            (Action::Undo, true) => Mutation::unfavorite(user_id, video_id),
        };
        self.system.invalidation.execute(mutation).await?;
        Ok(())
    }

    /// Videos liked by `user_id`
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] for an unknown user.
    pub async fn favorite_list(&self, viewer: i64, user_id: i64) -> ServiceResult<Vec<VideoView>> {
        self.system.users.read(user_id).await?;
        let ids = self.system.collections.favorite.read(user_id).await?;
        Ok(self.system.assembler.videos_by_id(viewer, &ids).await?)
    }

    /// Add a comment (returns it hydrated) or delete one (returns `None`)
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] for an unknown video or comment
    /// - [`ServiceError::NotAuthorized`] when deleting someone else's comment
    pub async fn comment_action(
        &self,
        user_id: i64,
        video_id: i64,
        action: CommentAction,
    ) -> ServiceResult<Option<CommentView>> {
        self.system.videos.read(video_id).await?;

        match action {
            CommentAction::Add { text } => {
                let report = self
                    .system
                    .invalidation
                    .execute(Mutation::add_comment(NewComment::now(user_id, video_id, text)))
                    .await?;
                let comment = report.created_comment.ok_or_else(|| {
                    ServiceError::Infrastructure(CacheError::Store(anyhow::anyhow!(
                        "comment insert reported no row"
                    )))
                })?;
                let view = self.system.assembler.comment_view(user_id, comment).await?;
                Ok(Some(view))
            }
            CommentAction::Delete { comment_id } => {
                let comment = self.system.comments.read(comment_id).await?;
                if comment.video_id != video_id {
                    return Err(ServiceError::NotFound);
                }
                if comment.user_id != user_id {
                    return Err(ServiceError::NotAuthorized);
                }
                self.system
                    .invalidation
                    .execute(Mutation::delete_comment(comment_id, video_id, user_id))
                    .await?;
                Ok(None)
            }
        }
    }

    /// Comments on `video_id`, newest first
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] for an unknown video.
    pub async fn comment_list(&self, viewer: i64, video_id: i64) -> ServiceResult<Vec<CommentView>> {
        self.system.videos.read(video_id).await?;
        let ids = self.system.collections.comment_ids.read(video_id).await?;
        Ok(self.system.assembler.comments_by_id(viewer, &ids).await?)
    }

    /// Follow or unfollow `to_user`
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidAction`] when targeting yourself
    /// - [`ServiceError::NotFound`] for an unknown user, or when unfollowing
    ///   someone not followed
    /// - [`ServiceError::AlreadyExists`] when following twice
    pub async fn relation_action(
        &self,
        user_id: i64,
        to_user: i64,
        action: Action,
    ) -> ServiceResult<()> {
        if user_id == to_user {
            return Err(ServiceError::InvalidAction);
        }
        self.system.users.read(to_user).await?;
        let follows = self.read_relation(user_id, to_user).await?;

        let mutation = match (action, follows) {
            (Action::Do, true) => return Err(ServiceError::AlreadyExists),
            (Action::Undo, false) => return Err(ServiceError::NotFound),
            (Action::Do, false) => Mutation::follow(user_id, to_user),
            (Action::Undo, true) => Mutation::unfollow(user_id, to_user),
        };
        self.system.invalidation.execute(mutation).await?;
        Ok(())
    }

    /// Whether `user_id` follows `to_user`, answered from the follow set
    ///
    /// # Errors
    ///
    /// Infrastructure errors only.
    pub async fn read_relation(&self, user_id: i64, to_user: i64) -> ServiceResult<bool> {
        Ok(self
            .system
            .collections
            .follow
            .contains(user_id, to_user)
            .await?)
    }

    /// Users `user_id` follows, each flagged relative to `viewer`
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] for an unknown user.
    pub async fn follow_list(&self, viewer: i64, user_id: i64) -> ServiceResult<Vec<UserView>> {
        self.system.users.read(user_id).await?;
        let ids = self.system.collections.follow.read(user_id).await?;
        Ok(self.system.assembler.user_views(viewer, &ids).await?)
    }

    /// Users following `user_id`, each flagged relative to `viewer`
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] for an unknown user.
    pub async fn follower_list(&self, viewer: i64, user_id: i64) -> ServiceResult<Vec<UserView>> {
        self.system.users.read(user_id).await?;
        let ids = self.system.collections.follower.read(user_id).await?;
        Ok(self.system.assembler.user_views(viewer, &ids).await?)
    }
}
