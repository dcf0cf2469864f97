//! Partial profile updates restricted to an allow-list of columns.

use serde_json::{Map, Value};

use super::{entities::CachedProfile, error::DomainError};

/// Profile columns that external events may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileField {
    Username,
    DisplayName,
    AvatarUrl,
}

impl ProfileField {
    pub const ALL: [ProfileField; 3] = [
        ProfileField::Username,
        ProfileField::DisplayName,
        ProfileField::AvatarUrl,
    ];

    pub fn column(self) -> &'static str {
        match self {
            ProfileField::Username => "username",
            ProfileField::DisplayName => "display_name",
            ProfileField::AvatarUrl => "avatar_url",
        }
    }

    pub fn from_column(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.column() == name)
    }
}

/// A validated set of column assignments. Field order follows insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    changes: Vec<(ProfileField, Option<String>)>,
}

impl ProfileUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an update from loosely typed JSON fields.
    ///
    /// Any key outside the allow-list rejects the whole update, so a caller
    /// never applies half of a message.
    pub fn from_json_fields(fields: &Map<String, Value>) -> Result<Self, DomainError> {
        let mut update = Self::new();
        for (name, value) in fields {
            let field = ProfileField::from_column(name)
                .ok_or_else(|| DomainError::disallowed_field(name.as_str()))?;
            let value = match value {
                Value::String(text) => Some(text.clone()),
                Value::Null => None,
                other => {
                    return Err(DomainError::validation(format!(
                        "field `{name}` must be a string or null, got {other}"
                    )));
                }
            };
            update = update.set(field, value)?;
        }
        Ok(update)
    }

    pub fn set(mut self, field: ProfileField, value: Option<String>) -> Result<Self, DomainError> {
        if field == ProfileField::Username {
            match value.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => {}
                _ => return Err(DomainError::validation("username must not be empty")),
            }
        }

        match self.changes.iter_mut().find(|(existing, _)| *existing == field) {
            Some(slot) => slot.1 = value,
            None => self.changes.push((field, value)),
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[(ProfileField, Option<String>)] {
        &self.changes
    }

    pub fn apply_to(&self, profile: &mut CachedProfile) {
        for (field, value) in &self.changes {
            match field {
                ProfileField::Username => {
                    if let Some(name) = value {
                        profile.username = name.clone();
                    }
                }
                ProfileField::DisplayName => profile.display_name = value.clone(),
                ProfileField::AvatarUrl => profile.avatar_url = value.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn accepts_allow_listed_fields() {
        let update =
            ProfileUpdate::from_json_fields(&fields(json!({"display_name": "X", "avatar_url": null})))
                .expect("valid update");
        assert_eq!(update.changes().len(), 2);
    }

    #[test]
    fn rejects_fields_outside_allow_list() {
        let err = ProfileUpdate::from_json_fields(&fields(json!({"display_name": "X", "email": "a@b"})))
            .expect_err("email is not updatable");
        assert!(matches!(err, DomainError::DisallowedField { field } if field == "email"));
    }

    #[test]
    fn rejects_non_string_values() {
        let err = ProfileUpdate::from_json_fields(&fields(json!({"display_name": 3})))
            .expect_err("numbers are not accepted");
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[test]
    fn username_cannot_be_cleared() {
        let err = ProfileUpdate::new()
            .set(ProfileField::Username, None)
            .expect_err("username is required");
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[test]
    fn apply_only_touches_listed_fields() {
        let mut profile = CachedProfile {
            id: Uuid::nil(),
            username: "alice".into(),
            display_name: Some("Alice".into()),
            avatar_url: Some("https://cdn/a.png".into()),
        };
        let update = ProfileUpdate::new()
            .set(ProfileField::DisplayName, Some("Al".into()))
            .expect("valid");
        update.apply_to(&mut profile);

        assert_eq!(profile.username, "alice");
        assert_eq!(profile.display_name.as_deref(), Some("Al"));
        assert_eq!(profile.avatar_url.as_deref(), Some("https://cdn/a.png"));
    }
}
