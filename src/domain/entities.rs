//! Domain entities mirrored from persistent storage.
//!
//! Every type here is also the JSON shape written to the key-value cache, so
//! field names are part of the cache format.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: i64,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub feed_view: String,
    pub views: i64,
    pub likes: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub validated: bool,
    pub not_validated_msg: Option<String>,
}

/// Public author block embedded in post and comment listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorSummary {
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullPost {
    pub post: PostRecord,
    pub author: AuthorSummary,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorPost {
    pub post: PostRecord,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub post_id: i64,
    pub author_id: Uuid,
    pub content: String,
    pub likes: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullComment {
    pub comment: CommentRecord,
    pub author: AuthorSummary,
}

/// Local replica of a profile owned by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedProfile {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<&CachedProfile> for AuthorSummary {
    fn from(profile: &CachedProfile) -> Self {
        Self {
            username: profile.username.clone(),
            display_name: profile.display_name.clone(),
            avatar_url: profile.avatar_url.clone(),
        }
    }
}
