//! Broker message formats consumed and produced by the engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{CachedProfile, PostRecord};

/// Why a message can never be processed; such messages are dropped.
#[derive(Debug, Error)]
pub enum PoisonMessage {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("`user_id` is missing")]
    MissingUserId,
    #[error("`user_id` is not a valid UUID: {0}")]
    InvalidUserId(String),
    #[error("payload was rejected: {0}")]
    Rejected(String),
}

/// `{"user_id": "<uuid>", <field>: <value>, ...}` published when a profile
/// changes upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileChangeEvent {
    pub user_id: Uuid,
    /// Remaining fields, validated later against the allow-list.
    pub fields: Map<String, Value>,
}

impl ProfileChangeEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, PoisonMessage> {
        let value: Value = serde_json::from_slice(payload)?;
        let Value::Object(mut fields) = value else {
            return Err(PoisonMessage::NotAnObject);
        };

        let user_id = match fields.remove("user_id") {
            Some(Value::String(raw)) => {
                Uuid::parse_str(&raw).map_err(|_| PoisonMessage::InvalidUserId(raw))?
            }
            Some(other) => return Err(PoisonMessage::InvalidUserId(other.to_string())),
            None => return Err(PoisonMessage::MissingUserId),
        };

        Ok(Self { user_id, fields })
    }
}

/// Full profile published when an account is created upstream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserCreatedEvent {
    #[serde(alias = "user_id")]
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl UserCreatedEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, PoisonMessage> {
        let event: Self = serde_json::from_slice(payload)?;
        if event.username.trim().is_empty() {
            return Err(PoisonMessage::Rejected("username must not be empty".into()));
        }
        Ok(event)
    }
}

impl From<UserCreatedEvent> for CachedProfile {
    fn from(event: UserCreatedEvent) -> Self {
        Self {
            id: event.id,
            username: event.username,
            display_name: event.display_name,
            avatar_url: event.avatar_url,
        }
    }
}

/// Fire-and-forget notification emitted after a post is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCreatedMessage {
    pub post_id: i64,
    pub user_id: Uuid,
    pub post_title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&PostRecord> for PostCreatedMessage {
    fn from(post: &PostRecord) -> Self {
        Self {
            post_id: post.id,
            user_id: post.author_id,
            post_title: post.title.clone(),
            created_at: post.created_at,
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to publish `{subject}`: {message}")]
pub struct PublishError {
    pub subject: String,
    pub message: String,
}

#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish_post_created(&self, message: &PostCreatedMessage) -> Result<(), PublishError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn profile_change_splits_user_id_from_fields() {
        let id = Uuid::new_v4();
        let payload = json!({"user_id": id.to_string(), "display_name": "X"}).to_string();
        let event = ProfileChangeEvent::parse(payload.as_bytes()).expect("valid event");

        assert_eq!(event.user_id, id);
        assert_eq!(event.fields.len(), 1);
        assert_eq!(event.fields.get("display_name"), Some(&json!("X")));
    }

    #[test]
    fn profile_change_without_user_id_is_poison() {
        let err = ProfileChangeEvent::parse(br#"{"display_name":"X"}"#).expect_err("poison");
        assert!(matches!(err, PoisonMessage::MissingUserId));
    }

    #[test]
    fn profile_change_with_bad_uuid_is_poison() {
        let err = ProfileChangeEvent::parse(br#"{"user_id":"nope"}"#).expect_err("poison");
        assert!(matches!(err, PoisonMessage::InvalidUserId(raw) if raw == "nope"));

        let err = ProfileChangeEvent::parse(br#"{"user_id":12}"#).expect_err("poison");
        assert!(matches!(err, PoisonMessage::InvalidUserId(_)));
    }

    #[test]
    fn non_json_and_non_object_payloads_are_poison() {
        assert!(matches!(
            ProfileChangeEvent::parse(b"not json"),
            Err(PoisonMessage::Json(_))
        ));
        assert!(matches!(
            ProfileChangeEvent::parse(b"[1,2]"),
            Err(PoisonMessage::NotAnObject)
        ));
    }

    #[test]
    fn user_created_accepts_either_id_field() {
        let id = Uuid::new_v4();
        let payload = json!({"user_id": id, "username": "bob"}).to_string();
        let event = UserCreatedEvent::parse(payload.as_bytes()).expect("valid");
        assert_eq!(event.id, id);
        assert_eq!(event.display_name, None);
    }

    #[test]
    fn post_created_message_uses_wire_names() {
        let message = PostCreatedMessage {
            post_id: 42,
            user_id: Uuid::nil(),
            post_title: "hello".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["post_id"], json!(42));
        assert_eq!(value["post_title"], json!("hello"));
        assert_eq!(value["created_at"], json!("1970-01-01T00:00:00Z"));
    }
}
