use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::application::repos::{ProfilesRepo, RepoError};
use crate::domain::{entities::CachedProfile, profile::ProfileUpdate};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    username: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
}

impl From<ProfileRow> for CachedProfile {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
        }
    }
}

#[async_trait]
impl ProfilesRepo for PostgresRepositories {
    async fn find_profile(&self, id: Uuid) -> Result<Option<CachedProfile>, RepoError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, username, display_name, avatar_url FROM cached_users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(CachedProfile::from))
    }

    async fn insert_profile(&self, profile: &CachedProfile) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO cached_users (id, username, display_name, avatar_url)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(profile.id)
        .bind(&profile.username)
        .bind(&profile.display_name)
        .bind(&profile.avatar_url)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<bool, RepoError> {
        if update.is_empty() {
            return Ok(false);
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE cached_users SET ");
        let mut assignments = qb.separated(", ");
        for (field, value) in update.changes() {
            // Column names come from the allow-list, never from input.
            assignments.push(field.column());
            assignments.push_unseparated(" = ");
            assignments.push_bind_unseparated(value.clone());
        }
        qb.push(" WHERE id = ");
        qb.push_bind(id);

        let result = qb
            .build()
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }
}
