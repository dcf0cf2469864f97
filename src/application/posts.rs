//! Post reads through the cache, plus post creation.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::application::{
    detached::spawn_best_effort,
    error::AppError,
    events::{NotificationPublisher, PostCreatedMessage},
    repos::{CreatePostParams, PostsRepo, PostsWriteRepo, RepoError},
};
use crate::cache::{CacheConfig, CacheKey, ReadThroughCache};
use crate::domain::{
    entities::{AuthorPost, FullPost, PostRecord},
    error::DomainError,
};

const MAX_TITLE_CHARS: usize = 200;

pub struct PostService {
    reader: Arc<dyn PostsRepo>,
    writer: Arc<dyn PostsWriteRepo>,
    cache: Arc<ReadThroughCache>,
    config: CacheConfig,
    notifier: Arc<dyn NotificationPublisher>,
}

impl PostService {
    pub fn new(
        reader: Arc<dyn PostsRepo>,
        writer: Arc<dyn PostsWriteRepo>,
        cache: Arc<ReadThroughCache>,
        config: CacheConfig,
        notifier: Arc<dyn NotificationPublisher>,
    ) -> Self {
        Self {
            reader,
            writer,
            cache,
            config,
            notifier,
        }
    }

    /// Loads a post and records a view in the background when it exists.
    #[instrument(skip(self))]
    pub async fn find_post(&self, id: i64) -> Result<Option<FullPost>, AppError> {
        let post = self
            .cache
            .get_or_load(&CacheKey::Post(id), self.config.post_ttl, || {
                self.reader.find_post(id)
            })
            .await
            .map_err(|err| read_failed("post", &err))?;

        if post.is_some() {
            let reader = Arc::clone(&self.reader);
            spawn_best_effort("increment_views", async move {
                reader.increment_views(id).await
            });
        }
        Ok(post)
    }

    pub async fn author_posts(
        &self,
        author_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<AuthorPost>, AppError> {
        let limit = self.config.clamp_limit(limit);
        let key = CacheKey::AuthorPosts {
            author: author_id,
            limit,
            offset,
        };
        self.cache
            .get_or_load(&key, self.config.author_posts_ttl, || {
                self.reader.list_author_posts(author_id, limit, offset)
            })
            .await
            .map_err(|err| read_failed("author_posts", &err))
    }

    pub async fn user_likes(
        &self,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FullPost>, AppError> {
        let limit = self.config.clamp_limit(limit);
        let key = CacheKey::UserLikes {
            user: user_id,
            limit,
            offset,
        };
        self.cache
            .get_or_load(&key, self.config.user_likes_ttl, || {
                self.reader.list_user_likes(user_id, limit, offset)
            })
            .await
            .map_err(|err| read_failed("user_likes", &err))
    }

    /// Most engaging posts created within the last `hours` (at most a week).
    pub async fn trending(&self, hours: u32, limit: u32) -> Result<Vec<FullPost>, AppError> {
        let hours = self.config.clamp_trending_hours(hours);
        let limit = self.config.clamp_limit(limit);
        let since = OffsetDateTime::now_utc() - time::Duration::hours(i64::from(hours));
        self.cache
            .get_or_load(
                &CacheKey::Trending { hours, limit },
                self.config.trending_ttl(hours),
                || self.reader.list_trending(since, limit),
            )
            .await
            .map_err(|err| read_failed("trending", &err))
    }

    pub async fn search_by_title(
        &self,
        title: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FullPost>, AppError> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(Vec::new());
        }
        let limit = self.config.clamp_limit(limit);
        self.cache
            .get_or_load(
                &CacheKey::title_search(title, limit, offset),
                self.config.search_ttl,
                || self.reader.search_by_title(title, limit, offset),
            )
            .await
            .map_err(|err| read_failed("title_search", &err))
    }

    /// Stores a post with its tags and announces it on the broker.
    ///
    /// Cached listings are not invalidated; they converge when their TTL
    /// lapses.
    pub async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, AppError> {
        let params = normalize_post(params)?;
        let author_id = params.author_id;
        let post = self.writer.create_post(params).await.map_err(|err| {
            error!(author_id = %author_id, error = %err, "failed to create post");
            AppError::Internal
        })?;

        let notifier = Arc::clone(&self.notifier);
        let message = PostCreatedMessage::from(&post);
        spawn_best_effort("publish_post_created", async move {
            notifier.publish_post_created(&message).await
        });
        Ok(post)
    }
}

fn normalize_post(mut params: CreatePostParams) -> Result<CreatePostParams, DomainError> {
    params.title = params.title.trim().to_string();
    if params.title.is_empty() {
        return Err(DomainError::validation("title must not be empty"));
    }
    if params.title.chars().count() > MAX_TITLE_CHARS {
        return Err(DomainError::validation(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    if params.content.trim().is_empty() {
        return Err(DomainError::validation("content must not be empty"));
    }

    let mut tags: Vec<String> = params
        .tags
        .iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    params.tags = tags;
    Ok(params)
}

fn read_failed(listing: &'static str, err: &RepoError) -> AppError {
    error!(listing, error = %err, "failed to load posts");
    AppError::Internal
}
