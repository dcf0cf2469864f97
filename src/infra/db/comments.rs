use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{CommentsRepo, CreateCommentParams, RepoError};
use crate::domain::entities::{AuthorSummary, CommentRecord, FullComment};

use super::{PostgresRepositories, map_sqlx_error, util::limit_offset};

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: i64,
    parent_id: Option<i64>,
    post_id: i64,
    author_id: Uuid,
    content: String,
    likes: i64,
    created_at: OffsetDateTime,
}

impl From<CommentRow> for CommentRecord {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            parent_id: row.parent_id,
            post_id: row.post_id,
            author_id: row.author_id,
            content: row.content,
            likes: row.likes,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct FullCommentRow {
    #[sqlx(flatten)]
    comment: CommentRow,
    username: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
}

impl From<FullCommentRow> for FullComment {
    fn from(row: FullCommentRow) -> Self {
        Self {
            comment: row.comment.into(),
            author: AuthorSummary {
                username: row.username,
                display_name: row.display_name,
                avatar_url: row.avatar_url,
            },
        }
    }
}

#[async_trait]
impl CommentsRepo for PostgresRepositories {
    async fn list_post_comments(
        &self,
        post_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FullComment>, RepoError> {
        let (limit, offset) = limit_offset(limit, offset);
        let rows = sqlx::query_as::<_, FullCommentRow>(
            r#"
            SELECT c.id, c.parent_id, c.post_id, c.author_id, c.content, c.likes, c.created_at,
                   u.username, u.display_name, u.avatar_url
            FROM comments c
            INNER JOIN cached_users u ON u.id = c.author_id
            WHERE c.post_id = $1 AND c.parent_id IS NULL
            ORDER BY c.created_at ASC, c.id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(post_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(FullComment::from).collect())
    }

    async fn list_replies(
        &self,
        post_id: i64,
        comment_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FullComment>, RepoError> {
        let (limit, offset) = limit_offset(limit, offset);
        let rows = sqlx::query_as::<_, FullCommentRow>(
            r#"
            SELECT c.id, c.parent_id, c.post_id, c.author_id, c.content, c.likes, c.created_at,
                   u.username, u.display_name, u.avatar_url
            FROM comments c
            INNER JOIN cached_users u ON u.id = c.author_id
            WHERE c.post_id = $1 AND c.parent_id = $2
            ORDER BY c.created_at ASC, c.id ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(post_id)
        .bind(comment_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(FullComment::from).collect())
    }

    async fn create_comment(
        &self,
        params: CreateCommentParams,
    ) -> Result<CommentRecord, RepoError> {
        let row = sqlx::query_as::<_, CommentRow>(
            r#"
            INSERT INTO comments (post_id, parent_id, author_id, content)
            VALUES ($1, $2, $3, $4)
            RETURNING id, parent_id, post_id, author_id, content, likes, created_at
            "#,
        )
        .bind(params.post_id)
        .bind(params.parent_id)
        .bind(params.author_id)
        .bind(&params.content)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn delete_comment(&self, id: i64, author_id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM comments WHERE id = $1 AND author_id = $2")
            .bind(id)
            .bind(author_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }
}
