//! Shared domain enumerations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Entity kinds that carry a denormalized like counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Post,
    Comment,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Post, EntityKind::Comment];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Post => "post",
            EntityKind::Comment => "comment",
        }
    }

    /// Prefix of the buffered counter delta keys for this kind.
    pub fn likes_prefix(self) -> &'static str {
        match self {
            EntityKind::Post => "post-likes",
            EntityKind::Comment => "comment-likes",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A likeable entity addressed by kind and numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn post(id: i64) -> Self {
        Self {
            kind: EntityKind::Post,
            id,
        }
    }

    pub fn comment(id: i64) -> Self {
        Self {
            kind: EntityKind::Comment,
            id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn likes_prefixes_are_distinct_per_kind() {
        assert_eq!(EntityKind::Post.likes_prefix(), "post-likes");
        assert_eq!(EntityKind::Comment.likes_prefix(), "comment-likes");
    }

    #[test]
    fn entity_ref_display_names_kind_and_id() {
        assert_eq!(EntityRef::post(42).to_string(), "post(42)");
        assert_eq!(EntityRef::comment(7).to_string(), "comment(7)");
    }
}
