//! Composite Assembler
//!
//! Hydrates videos, users and comments for a viewer: the author through the
//! user cache, `is_favorite` through the favorite set and `is_follow` through
//! the follow set. Items are resolved concurrently; each lookup goes through
//! its own population-on-miss path.

use std::sync::Arc;

use futures_util::future::try_join_all;
use tracing::debug;

use crate::collection::Collections;
use crate::entity::{CommentCache, UserCache, VideoCache};
use crate::error::{CacheError, CacheResult};
use crate::model::{ANONYMOUS, Comment, CommentView, UserView, Video, VideoView};

pub struct Assembler {
    users: Arc<UserCache>,
    videos: Arc<VideoCache>,
    comments: Arc<CommentCache>,
    collections: Arc<Collections>,
}

impl Assembler {
    pub fn new(
        users: Arc<UserCache>,
        videos: Arc<VideoCache>,
        comments: Arc<CommentCache>,
        collections: Arc<Collections>,
    ) -> Self {
        Self {
            users,
            videos,
            comments,
            collections,
        }
    }

    /// Whether `viewer` follows `target`. Anonymous viewers and self-views
    /// are answered without a lookup.
    ///
    /// # Errors
    ///
    /// Propagates follow-set errors.
    pub async fn is_follow(&self, viewer: i64, target: i64) -> CacheResult<bool> {
        if viewer == ANONYMOUS || viewer == target {
            return Ok(false);
        }
        self.collections.follow.contains(viewer, target).await
    }

    /// Whether `viewer` liked `video_id`
    ///
    /// # Errors
    ///
    /// Propagates favorite-set errors.
    pub async fn is_favorite(&self, viewer: i64, video_id: i64) -> CacheResult<bool> {
        if viewer == ANONYMOUS {
            return Ok(false);
        }
        self.collections.favorite.contains(viewer, video_id).await
    }

    /// # Errors
    ///
    /// Propagates user-cache and follow-set errors.
    pub async fn user_view(&self, viewer: i64, user_id: i64) -> CacheResult<UserView> {
        let (user, is_follow) = tokio::try_join!(
            self.users.read(user_id),
            self.is_follow(viewer, user_id)
        )?;
        Ok(UserView { user, is_follow })
    }

    /// # Errors
    ///
    /// Fails if any single user fails.
    pub async fn user_views(&self, viewer: i64, ids: &[i64]) -> CacheResult<Vec<UserView>> {
        try_join_all(ids.iter().map(|id| self.user_view(viewer, *id))).await
    }

    /// # Errors
    ///
    /// Propagates author and favorite-set errors.
    pub async fn video_view(&self, viewer: i64, video: Video) -> CacheResult<VideoView> {
        let (author, is_favorite) = tokio::try_join!(
            self.user_view(viewer, video.user_id),
            self.is_favorite(viewer, video.id)
        )?;
        Ok(VideoView {
            video,
            author,
            is_favorite,
        })
    }

    /// Hydrate `videos`, keeping their order
    ///
    /// # Errors
    ///
    /// Fails if any single video fails.
    pub async fn video_views(&self, viewer: i64, videos: Vec<Video>) -> CacheResult<Vec<VideoView>> {
        try_join_all(videos.into_iter().map(|video| self.video_view(viewer, video))).await
    }

    /// Resolve ids through the video cache, then hydrate
    ///
    /// # Errors
    ///
    /// Fails if any single video fails.
    pub async fn videos_by_id(&self, viewer: i64, ids: &[i64]) -> CacheResult<Vec<VideoView>> {
        let videos = try_join_all(ids.iter().map(|id| self.videos.read(*id))).await?;
        self.video_views(viewer, videos).await
    }

    /// # Errors
    ///
    /// Propagates author errors.
    pub async fn comment_view(&self, viewer: i64, comment: Comment) -> CacheResult<CommentView> {
        let user = self.user_view(viewer, comment.user_id).await?;
        Ok(CommentView {
            id: comment.id,
            user,
            content: comment.content,
            create_date: comment.create_date,
        })
    }

    /// Resolve comment ids, newest (highest id) first.
    ///
    /// A comment deleted after its id was read is left out.
    ///
    /// # Errors
    ///
    /// Fails on any error other than a vanished comment.
    pub async fn comments_by_id(&self, viewer: i64, ids: &[i64]) -> CacheResult<Vec<CommentView>> {
        let mut ids = ids.to_vec();
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let found = try_join_all(ids.iter().map(|id| async move {
            match self.comments.read(*id).await {
                Ok(comment) => Ok(Some(comment)),
                Err(CacheError::NotFound { .. }) => {
                    debug!(comment_id = *id, "Comment vanished while listing, skipping");
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        }))
        .await?;

        try_join_all(
            found
                .into_iter()
                .flatten()
                .map(|comment| self.comment_view(viewer, comment)),
        )
        .await
    }
}
