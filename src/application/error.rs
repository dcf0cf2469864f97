use std::fmt::Display;

use thiserror::Error;
use tracing::error;

use crate::{domain::error::DomainError, infra::error::InfraError};

/// Errors surfaced by application services.
///
/// Store, broker and identity failures are logged where they happen and
/// collapse to [`AppError::Internal`], so callers never see backend messages.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("entity is already liked by this user")]
    AlreadyLiked,
    #[error("entity is not currently liked by this user")]
    NotLiked,
    #[error("resource not found")]
    NotFound,
    #[error("internal error")]
    Internal,
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Logs `err` under `source` and returns the opaque internal error.
    pub(crate) fn internal(source: &'static str, err: impl Display) -> Self {
        error!(source, error = %err, "internal failure");
        Self::Internal
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::Domain(DomainError::Validation { .. } | DomainError::DisallowedField { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_hides_backend_detail() {
        let err = AppError::internal("tests", "relation \"posts\" does not exist");
        assert_eq!(err.to_string(), "internal error");
    }

    #[test]
    fn disallowed_fields_count_as_validation() {
        let err = AppError::from(DomainError::disallowed_field("email"));
        assert!(err.is_validation());
        assert!(!AppError::NotFound.is_validation());
    }
}
