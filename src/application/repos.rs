//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{
    AuthorPost, CachedProfile, CommentRecord, FullComment, FullPost, PostRecord,
};
use crate::domain::profile::ProfileUpdate;
use crate::domain::types::EntityRef;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    /// The store could not hand out a connection right now; worth retrying.
    #[error("store busy")]
    Busy,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::Busy)
    }
}

#[derive(Debug, Clone)]
pub struct CreatePostParams {
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub feed_view: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CreateCommentParams {
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub author_id: Uuid,
    pub content: String,
}

#[async_trait]
pub trait PostsRepo: Send + Sync {
    /// Validated post with author and tags.
    async fn find_post(&self, id: i64) -> Result<Option<FullPost>, RepoError>;

    async fn list_author_posts(
        &self,
        author_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<AuthorPost>, RepoError>;

    /// Posts liked by `user_id`, most recent like first.
    async fn list_user_likes(
        &self,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FullPost>, RepoError>;

    /// Posts created since `since`, ordered by likes then views.
    async fn list_trending(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<FullPost>, RepoError>;

    async fn search_by_title(
        &self,
        title: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FullPost>, RepoError>;

    async fn increment_views(&self, id: i64) -> Result<(), RepoError>;
}

#[async_trait]
pub trait PostsWriteRepo: Send + Sync {
    /// Inserts the post and its tags in one transaction.
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError>;
}

#[async_trait]
pub trait CommentsRepo: Send + Sync {
    /// Top-level comments of a post.
    async fn list_post_comments(
        &self,
        post_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FullComment>, RepoError>;

    async fn list_replies(
        &self,
        post_id: i64,
        comment_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FullComment>, RepoError>;

    async fn create_comment(&self, params: CreateCommentParams)
    -> Result<CommentRecord, RepoError>;

    /// Returns whether a comment owned by `author_id` was removed.
    async fn delete_comment(&self, id: i64, author_id: Uuid) -> Result<bool, RepoError>;
}

/// Like membership rows and the denormalized counters they feed.
#[async_trait]
pub trait LikesRepo: Send + Sync {
    /// Inserts the membership row; `false` when it already existed.
    async fn insert_like(&self, entity: EntityRef, user_id: Uuid) -> Result<bool, RepoError>;

    /// Deletes the membership row; `false` when there was none.
    async fn delete_like(&self, entity: EntityRef, user_id: Uuid) -> Result<bool, RepoError>;

    async fn like_exists(&self, entity: EntityRef, user_id: Uuid) -> Result<bool, RepoError>;

    /// Applies `likes = max(likes + delta, 0)`.
    async fn apply_likes_delta(&self, entity: EntityRef, delta: i64) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ProfilesRepo: Send + Sync {
    async fn find_profile(&self, id: Uuid) -> Result<Option<CachedProfile>, RepoError>;

    /// Fails with [`RepoError::Duplicate`] when the id already exists.
    async fn insert_profile(&self, profile: &CachedProfile) -> Result<(), RepoError>;

    /// Applies a partial update; `false` when no row matched.
    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<bool, RepoError>;
}
