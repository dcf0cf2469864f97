use std::sync::Arc;

use tracing::error;
use uuid::Uuid;

use crate::application::{
    error::AppError,
    repos::{CommentsRepo, CreateCommentParams},
};
use crate::cache::{CacheConfig, CacheKey, ReadThroughCache};
use crate::domain::{
    entities::{CommentRecord, FullComment},
    error::DomainError,
};

const MAX_COMMENT_CHARS: usize = 4000;

pub struct CommentService {
    repo: Arc<dyn CommentsRepo>,
    cache: Arc<ReadThroughCache>,
    config: CacheConfig,
}

impl CommentService {
    pub fn new(repo: Arc<dyn CommentsRepo>, cache: Arc<ReadThroughCache>, config: CacheConfig) -> Self {
        Self {
            repo,
            cache,
            config,
        }
    }

    pub async fn post_comments(
        &self,
        post_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FullComment>, AppError> {
        let limit = self.config.clamp_limit(limit);
        let key = CacheKey::PostComments {
            post: post_id,
            limit,
            offset,
        };
        self.cache
            .get_or_load(&key, self.config.comments_ttl, || {
                self.repo.list_post_comments(post_id, limit, offset)
            })
            .await
            .map_err(|err| {
                error!(post_id, error = %err, "failed to load comments");
                AppError::Internal
            })
    }

    pub async fn replies(
        &self,
        post_id: i64,
        comment_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FullComment>, AppError> {
        let limit = self.config.clamp_limit(limit);
        let key = CacheKey::CommentReplies {
            post: post_id,
            comment: comment_id,
            limit,
            offset,
        };
        self.cache
            .get_or_load(&key, self.config.comments_ttl, || {
                self.repo.list_replies(post_id, comment_id, limit, offset)
            })
            .await
            .map_err(|err| {
                error!(post_id, comment_id, error = %err, "failed to load replies");
                AppError::Internal
            })
    }

    pub async fn create_comment(
        &self,
        mut params: CreateCommentParams,
    ) -> Result<CommentRecord, AppError> {
        params.content = params.content.trim().to_string();
        if params.content.is_empty() {
            return Err(DomainError::validation("comment must not be empty").into());
        }
        if params.content.chars().count() > MAX_COMMENT_CHARS {
            return Err(DomainError::validation(format!(
                "comment must be at most {MAX_COMMENT_CHARS} characters"
            ))
            .into());
        }

        let post_id = params.post_id;
        self.repo.create_comment(params).await.map_err(|err| {
            error!(post_id, error = %err, "failed to create comment");
            AppError::Internal
        })
    }

    pub async fn delete_comment(&self, id: i64, author_id: Uuid) -> Result<(), AppError> {
        let removed = self.repo.delete_comment(id, author_id).await.map_err(|err| {
            error!(comment_id = id, author_id = %author_id, error = %err, "failed to delete comment");
            AppError::Internal
        })?;
        if removed { Ok(()) } else { Err(AppError::NotFound) }
    }
}
