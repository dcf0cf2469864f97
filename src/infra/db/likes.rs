use async_trait::async_trait;
use uuid::Uuid;

use crate::application::repos::{LikesRepo, RepoError};
use crate::domain::types::{EntityKind, EntityRef};

use super::{PostgresRepositories, map_sqlx_error};

/// Membership table, its entity column, and the table holding the counter.
fn tables(kind: EntityKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        EntityKind::Post => ("post_likes", "post_id", "posts"),
        EntityKind::Comment => ("comment_likes", "comment_id", "comments"),
    }
}

#[async_trait]
impl LikesRepo for PostgresRepositories {
    async fn insert_like(&self, entity: EntityRef, user_id: Uuid) -> Result<bool, RepoError> {
        let (membership, column, _) = tables(entity.kind);
        let sql = format!(
            "INSERT INTO {membership} ({column}, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        );
        let result = sqlx::query(&sql)
            .bind(entity.id)
            .bind(user_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_like(&self, entity: EntityRef, user_id: Uuid) -> Result<bool, RepoError> {
        let (membership, column, _) = tables(entity.kind);
        let sql = format!("DELETE FROM {membership} WHERE {column} = $1 AND user_id = $2");
        let result = sqlx::query(&sql)
            .bind(entity.id)
            .bind(user_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn like_exists(&self, entity: EntityRef, user_id: Uuid) -> Result<bool, RepoError> {
        let (membership, column, _) = tables(entity.kind);
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {membership} WHERE {column} = $1 AND user_id = $2)"
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(entity.id)
            .bind(user_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(exists)
    }

    async fn apply_likes_delta(&self, entity: EntityRef, delta: i64) -> Result<(), RepoError> {
        let (_, _, counters) = tables(entity.kind);
        let sql = format!("UPDATE {counters} SET likes = GREATEST(likes + $1, 0) WHERE id = $2");
        // A deleted entity matches no row; its delta is simply discarded.
        sqlx::query(&sql)
            .bind(delta)
            .bind(entity.id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
