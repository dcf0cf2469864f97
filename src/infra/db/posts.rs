use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{CreatePostParams, PostsRepo, PostsWriteRepo, RepoError};
use crate::domain::entities::{AuthorPost, AuthorSummary, FullPost, PostRecord};

use super::{PostgresRepositories, map_sqlx_error, util::limit_offset};

const POST_COLUMNS: &str = "p.id, p.author_id, p.title, p.content, p.feed_view, p.views, p.likes, \
    p.created_at, p.updated_at, p.validated, p.not_validated_msg";

const TAGS_EXPR: &str = "ARRAY(SELECT pt.tag FROM post_tags pt WHERE pt.post_id = p.id ORDER BY pt.tag) AS tags";

#[derive(sqlx::FromRow)]
struct PostRow {
    id: i64,
    author_id: Uuid,
    title: String,
    content: String,
    feed_view: String,
    views: i64,
    likes: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    validated: bool,
    not_validated_msg: Option<String>,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            title: row.title,
            content: row.content,
            feed_view: row.feed_view,
            views: row.views,
            likes: row.likes,
            created_at: row.created_at,
            updated_at: row.updated_at,
            validated: row.validated,
            not_validated_msg: row.not_validated_msg,
        }
    }
}

#[derive(sqlx::FromRow)]
struct FullPostRow {
    #[sqlx(flatten)]
    post: PostRow,
    username: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
    tags: Vec<String>,
}

impl From<FullPostRow> for FullPost {
    fn from(row: FullPostRow) -> Self {
        Self {
            post: row.post.into(),
            author: AuthorSummary {
                username: row.username,
                display_name: row.display_name,
                avatar_url: row.avatar_url,
            },
            tags: row.tags,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AuthorPostRow {
    #[sqlx(flatten)]
    post: PostRow,
    tags: Vec<String>,
}

fn full_post_select() -> String {
    format!(
        "SELECT {POST_COLUMNS}, u.username, u.display_name, u.avatar_url, {TAGS_EXPR} \
         FROM posts p \
         INNER JOIN cached_users u ON u.id = p.author_id"
    )
}

/// Escapes `LIKE` wildcards so user input matches literally.
fn like_pattern(title: &str) -> String {
    let mut escaped = String::with_capacity(title.len() + 2);
    escaped.push('%');
    for ch in title.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn find_post(&self, id: i64) -> Result<Option<FullPost>, RepoError> {
        let sql = format!("{} WHERE p.id = $1 AND p.validated", full_post_select());
        let row = sqlx::query_as::<_, FullPostRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(FullPost::from))
    }

    async fn list_author_posts(
        &self,
        author_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<AuthorPost>, RepoError> {
        let (limit, offset) = limit_offset(limit, offset);
        let sql = format!(
            "SELECT {POST_COLUMNS}, {TAGS_EXPR} \
             FROM posts p \
             WHERE p.author_id = $1 AND p.validated \
             ORDER BY p.created_at DESC, p.id DESC \
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, AuthorPostRow>(&sql)
            .bind(author_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| AuthorPost {
                post: row.post.into(),
                tags: row.tags,
            })
            .collect())
    }

    async fn list_user_likes(
        &self,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FullPost>, RepoError> {
        let (limit, offset) = limit_offset(limit, offset);
        let sql = format!(
            "{} INNER JOIN post_likes pl ON pl.post_id = p.id \
             WHERE pl.user_id = $1 AND p.validated \
             ORDER BY pl.created_at DESC, p.id DESC \
             LIMIT $2 OFFSET $3",
            full_post_select()
        );
        let rows = sqlx::query_as::<_, FullPostRow>(&sql)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(FullPost::from).collect())
    }

    async fn list_trending(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<FullPost>, RepoError> {
        let sql = format!(
            "{} WHERE p.created_at >= $1 AND p.validated \
             ORDER BY p.likes DESC, p.views DESC, p.created_at DESC \
             LIMIT $2",
            full_post_select()
        );
        let rows = sqlx::query_as::<_, FullPostRow>(&sql)
            .bind(since)
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(FullPost::from).collect())
    }

    async fn search_by_title(
        &self,
        title: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FullPost>, RepoError> {
        let (limit, offset) = limit_offset(limit, offset);
        let sql = format!(
            "{} WHERE p.title ILIKE $1 AND p.validated \
             ORDER BY p.created_at DESC, p.id DESC \
             LIMIT $2 OFFSET $3",
            full_post_select()
        );
        let rows = sqlx::query_as::<_, FullPostRow>(&sql)
            .bind(like_pattern(title))
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(FullPost::from).collect())
    }

    async fn increment_views(&self, id: i64) -> Result<(), RepoError> {
        sqlx::query("UPDATE posts SET views = views + 1 WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl PostsWriteRepo for PostgresRepositories {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let row = sqlx::query_as::<_, PostRow>(
            r#"
            INSERT INTO posts (author_id, title, content, feed_view)
            VALUES ($1, $2, $3, $4)
            RETURNING id, author_id, title, content, feed_view, views, likes,
                      created_at, updated_at, validated, not_validated_msg
            "#,
        )
        .bind(params.author_id)
        .bind(&params.title)
        .bind(&params.content)
        .bind(&params.feed_view)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if !params.tags.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO post_tags (post_id, tag)
                SELECT $1, UNNEST($2::text[])
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(row.id)
            .bind(&params.tags)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("rust"), "%rust%");
    }
}
