//! Cache key grammar.
//!
//! `CacheKey` covers every read-through entry; counter deltas and the dirty
//! index use the `<prefix>:<id>` grammar built by the free functions below.

use std::fmt;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::types::EntityKind;

/// Member name of the per-kind dirty index, stored beside the delta keys.
const DIRTY_SUFFIX: &str = "dirty";

/// Read-through cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A single post with author and tags, or the negative marker.
    Post(i64),
    AuthorPosts {
        author: Uuid,
        limit: u32,
        offset: u32,
    },
    UserLikes {
        user: Uuid,
        limit: u32,
        offset: u32,
    },
    PostComments {
        post: i64,
        limit: u32,
        offset: u32,
    },
    CommentReplies {
        post: i64,
        comment: i64,
        limit: u32,
        offset: u32,
    },
    Trending {
        hours: u32,
        limit: u32,
    },
    /// Title search; the title is stored as a digest so keys stay bounded.
    TitleSearch {
        digest: String,
        limit: u32,
        offset: u32,
    },
    Profile(Uuid),
    LikeState {
        kind: EntityKind,
        user: Uuid,
        id: i64,
    },
}

impl CacheKey {
    pub fn title_search(title: &str, limit: u32, offset: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(title.trim().to_lowercase().as_bytes());
        Self::TitleSearch {
            digest: hex::encode(hasher.finalize()),
            limit,
            offset,
        }
    }

    /// Low-cardinality label used for metrics.
    pub fn namespace(&self) -> &'static str {
        match self {
            CacheKey::Post(_) => "post",
            CacheKey::AuthorPosts { .. } => "author_posts",
            CacheKey::UserLikes { .. } => "user_likes",
            CacheKey::PostComments { .. } => "post_comments",
            CacheKey::CommentReplies { .. } => "comment_replies",
            CacheKey::Trending { .. } => "trending",
            CacheKey::TitleSearch { .. } => "title_search",
            CacheKey::Profile(_) => "profile",
            CacheKey::LikeState { .. } => "like_state",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Post(id) => write!(f, "post:{id}"),
            CacheKey::AuthorPosts {
                author,
                limit,
                offset,
            } => write!(f, "author:{author}-posts:{limit}:{offset}"),
            CacheKey::UserLikes {
                user,
                limit,
                offset,
            } => write!(f, "user:{user}-likes:{limit}:{offset}"),
            CacheKey::PostComments {
                post,
                limit,
                offset,
            } => write!(f, "post:{post}-comments:{limit}:{offset}"),
            CacheKey::CommentReplies {
                post,
                comment,
                limit,
                offset,
            } => write!(f, "post:{post}-comment:{comment}-replies:{limit}:{offset}"),
            CacheKey::Trending { hours, limit } => write!(f, "trending:{hours}:{limit}"),
            CacheKey::TitleSearch {
                digest,
                limit,
                offset,
            } => write!(f, "search:{digest}:{limit}:{offset}"),
            CacheKey::Profile(id) => write!(f, "user-cache:{id}"),
            CacheKey::LikeState { kind, user, id } => {
                write!(f, "user:{user}-is-liked-{kind}:{id}")
            }
        }
    }
}

/// Buffered like delta for one entity, e.g. `post-likes:42`.
pub fn likes_delta_key(kind: EntityKind, id: i64) -> String {
    format!("{}:{id}", kind.likes_prefix())
}

/// Set of entity ids with an unflushed delta.
pub fn dirty_index_key(kind: EntityKind) -> String {
    format!("{}:{DIRTY_SUFFIX}", kind.likes_prefix())
}

pub fn delta_key_pattern(kind: EntityKind) -> String {
    format!("{}:*", kind.likes_prefix())
}

/// Extracts the entity id from a delta key of the given kind.
///
/// Returns `None` for foreign prefixes, the dirty index, and malformed ids.
pub fn parse_delta_key(kind: EntityKind, key: &str) -> Option<i64> {
    let rest = key.strip_prefix(kind.likes_prefix())?.strip_prefix(':')?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}
